use anyhow::Context;
use fieldsyncd::config::SyncConfig;
use fieldsyncd::daemon::DaemonRuntime;
use fieldsyncd::logging;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Once,
    Upload,
    Status,
    Discard(i64),
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--once" => mode = CliMode::Once,
            "--upload" => mode = CliMode::Upload,
            "--status" => mode = CliMode::Status,
            "--discard" => {
                let id = args.next().context("--discard needs a queue entry id")?;
                let id = id
                    .parse::<i64>()
                    .with_context(|| format!("invalid queue entry id: {id}"))?;
                mode = CliMode::Discard(id);
            }
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to encode result")?;
    println!("{text}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: fieldsyncd [--once | --upload | --status | --discard <entry-id>]");
        println!("  (no flag)            Sync periodically until Ctrl-C");
        println!("  --once               Run one full sync and print the result");
        println!("  --upload             Upload queued local changes only");
        println!("  --status             Print queue and dirty-record summary");
        println!("  --discard <entry-id> Drop one queued change permanently");
        return Ok(());
    }

    logging::init();
    let config = SyncConfig::from_env()?;
    let daemon = DaemonRuntime::bootstrap(config).await?;
    match mode {
        CliMode::Run => daemon.run().await,
        CliMode::Once => {
            let report = daemon.sync_once().await;
            print_json(&report)?;
            if !report.success {
                std::process::exit(1);
            }
            Ok(())
        }
        CliMode::Upload => print_json(&daemon.engine().upload_only().await),
        CliMode::Status => {
            let stats = daemon
                .engine()
                .status()
                .await
                .context("failed to read sync status")?;
            print_json(&stats)
        }
        CliMode::Discard(id) => {
            let removed = daemon
                .engine()
                .discard_entry(id)
                .await
                .context("failed to discard queue entry")?;
            anyhow::ensure!(removed, "no queue entry with id {id}");
            eprintln!("queue entry {id} discarded");
            Ok(())
        }
        CliMode::Help => Ok(()),
    }
}
