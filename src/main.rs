use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use rust_site_crawler::{
    AppConfig, CrawlResult, HttpEngine, LinkMap, PooledRenderer, ResourcePool, SiteCrawler,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum View {
    All,
    Internal,
    External,
}

/// Crawl a site breadth-first through a bounded pool of page sessions
#[derive(Debug, Parser)]
#[command(name = "rust-site-crawler", version, about)]
struct Cli {
    /// URL to start crawling from
    url: String,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Breadth-first levels to fetch
    #[arg(long)]
    max_depth: Option<usize>,

    /// Maximum number of pages to fetch
    #[arg(long)]
    max_pages: Option<usize>,

    /// Follow links to other hostnames
    #[arg(long)]
    any_domain: bool,

    /// Extra substring to exclude (repeatable)
    #[arg(long = "exclude")]
    exclude: Vec<String>,

    /// Substring a URL must contain to be followed (repeatable)
    #[arg(long = "include")]
    include: Vec<String>,

    /// Pause between depth levels in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Concurrent page sessions
    #[arg(long)]
    capacity: Option<usize>,

    /// Print the full result as JSON
    #[arg(long)]
    json: bool,

    /// Which links to print
    #[arg(long, value_enum, default_value_t = View::All)]
    view: View,
}

#[tokio::main]
async fn main() {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let exit_code = match run(Cli::parse()).await {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            log::error!("{:#}", e);
            2
        }
    };

    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<bool> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    apply_cli(&mut config, &cli);

    let engine = Arc::new(HttpEngine::new(config.engine.clone()));
    let pool = Arc::new(ResourcePool::new(engine, config.pool.to_pool_config()));
    let reaper = pool.spawn_reaper();
    let renderer = PooledRenderer::new(Arc::clone(&pool));

    log::info!(
        "🚀 Crawling {} with {} session(s)",
        cli.url,
        pool.config().capacity
    );

    let mut crawler = SiteCrawler::new(renderer);
    let result = crawler.crawl(&cli.url, &config.crawl).await;

    let links = match cli.view {
        View::All => result.link_map.clone(),
        View::Internal => crawler.internal_links(),
        View::External => crawler.external_links(),
    };

    let printed = if cli.json {
        let output = serde_json::json!({
            "result": with_view(&result, links),
            "stats": crawler.stats(),
            "pool": pool.status().await,
        });
        serde_json::to_string_pretty(&output).map(|json| println!("{}", json))
    } else {
        print_summary(&result, &links, &crawler.stats());
        Ok(())
    };

    pool.shutdown().await;
    reaper.abort();
    printed?;

    Ok(result.success)
}

/// The result as shown for a `--view`: filtered link map and matching totals.
fn with_view(result: &CrawlResult, links: LinkMap) -> CrawlResult {
    CrawlResult {
        total_links: links.total_links(),
        link_map: links,
        ..result.clone()
    }
}

fn apply_cli(config: &mut AppConfig, cli: &Cli) {
    if let Some(depth) = cli.max_depth {
        config.crawl.max_depth = depth;
    }
    if let Some(pages) = cli.max_pages {
        config.crawl.max_pages = pages;
    }
    if cli.any_domain {
        config.crawl.same_domain = false;
    }
    config.crawl.exclude_patterns.extend(cli.exclude.iter().cloned());
    if !cli.include.is_empty() {
        config.crawl.include_patterns = cli.include.clone();
    }
    if let Some(delay) = cli.delay_ms {
        config.crawl.delay_ms = delay;
    }
    if let Some(capacity) = cli.capacity {
        config.pool.capacity = capacity;
    }
}

fn print_summary(result: &CrawlResult, links: &LinkMap, stats: &rust_site_crawler::CrawlStats) {
    if !result.success {
        println!("❌ Crawl failed: {}", result.error.as_deref().unwrap_or("unknown error"));
        return;
    }

    for (page, page_links) in links.iter() {
        println!("{} ({} links)", page, page_links.len());
        for link in page_links {
            let marker = if link.is_internal { "→" } else { "↗" };
            println!("   {} {} {}", marker, link.url, link.text);
        }
    }

    println!();
    println!("📊 Summary:");
    println!("   📄 Pages: {}", result.total_pages);
    println!("   🔗 Links: {}", links.total_links());
    println!("   🌐 Domains: {}", stats.domains.join(", "));
    println!("   📈 Avg links/page: {:.1}", stats.average_links_per_page);
    if !result.failures.is_empty() {
        println!("   ⚠️  Failed pages: {}", result.failures.len());
        for failure in &result.failures {
            println!("      {} ({:?}): {}", failure.url, failure.kind, failure.message);
        }
    }
}
