//! alumnium 命令行
//!
//! 连接已开启远程调试的 Chromium，执行一个动词并打印结果与 token 用量：
//!
//! ```text
//! alumnium do "add a todo 'Buy milk'" [--url https://todomvc.com/examples/vue/dist/]
//! alumnium check "'Buy milk' is in the list" [--vision]
//! alumnium get "titles of all todos"
//! ```
//!
//! DevTools 端点来自 `ALUMNIUM_CDP_URL`：`ws://` 直接连接，`http://` 先查询 `/json/version`；
//! 默认 `http://127.0.0.1:9222`。动词成功后保存缓存，失败时丢弃。

use std::sync::Arc;

use anyhow::{bail, Context};
use alumnium::config::load_config;
use alumnium::drivers::{ChromiumDriver, Driver, DriverOptions, WsCdpTransport};
use alumnium::{observability, Alumni};

const DEFAULT_CDP_URL: &str = "http://127.0.0.1:9222";

struct Args {
    verb: String,
    text: String,
    url: Option<String>,
    vision: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = std::env::args().skip(1);
    let verb = args.next().context("usage: alumnium <do|check|get> <text> [--url URL] [--vision]")?;
    let text = args.next().context("missing verb argument")?;
    let mut url = None;
    let mut vision = false;
    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--url" => url = Some(args.next().context("--url requires a value")?),
            "--vision" => vision = true,
            other => bail!("unknown flag: {other}"),
        }
    }
    Ok(Args {
        verb,
        text,
        url,
        vision,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args()?;
    let config = load_config(None).context("Failed to load config")?;
    observability::init(&config);

    let endpoint = std::env::var("ALUMNIUM_CDP_URL").unwrap_or_else(|_| DEFAULT_CDP_URL.to_string());
    let timeout = config.driver_timeout();
    let transport = if endpoint.starts_with("ws") {
        WsCdpTransport::connect(&endpoint, timeout).await
    } else {
        WsCdpTransport::discover(&endpoint, timeout).await
    }
    .with_context(|| format!("Failed to connect to {endpoint}"))?;

    let driver = ChromiumDriver::attach(Arc::new(transport), DriverOptions::from_config(&config))
        .await
        .context("Failed to attach to page")?;
    if let Some(url) = &args.url {
        driver.visit(url).await.context("Navigation failed")?;
    }

    let al = Alumni::new(Arc::new(driver), config).context("Failed to start session")?;
    let outcome = match args.verb.as_str() {
        "do" => al
            .do_(&args.text)
            .await
            .map(|result| serde_json::to_string_pretty(&result).unwrap_or_default()),
        "check" => al.check(&args.text, args.vision).await,
        "get" => al.get(&args.text, args.vision).await.map(|data| match data {
            Some(data) => data.to_string(),
            None => "NOOP".to_string(),
        }),
        other => bail!("unknown verb: {other}"),
    };

    match outcome {
        Ok(output) => {
            if let Err(e) = al.cache_save() {
                tracing::warn!(error = %e, "Failed to save cache");
            }
            println!("{output}");
            println!("{}", serde_json::to_string(&al.stats())?);
            Ok(())
        }
        Err(e) => {
            al.cache_discard();
            println!("{}", serde_json::to_string(&al.stats())?);
            Err(e).context(format!("{} failed", args.verb))
        }
    }
}
