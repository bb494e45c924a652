//! Tubekit command line front end.
//!
//! A thin adapter over [`tubekit_core::Engine`]: every subcommand maps to one
//! engine command, and long-running commands print bus events as they arrive.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tubekit_core::{
    BusEvent, CommandResponse, DependencyType, DownloadConfig, DownloadRequest, Engine,
    EventPayload, QuickDownloadRequest, TaskType,
};

const USAGE: &str = "\
Usage: tubekit <command> [args]

Tasks:
  download <url> [--format ID] [--subs LANGS] [--sub-format FMT]
                 [--translate LANG] [--style STYLE] [--browser NAME]
                 [--recode FORMAT_ID]
  quick <url> [--format SELECTOR] [--captions] [--browser NAME]
              [--recode FORMAT_ID]
  parse <url> [--browser NAME]
  tasks
  task <id>
  find <url>
  delete <id>
  thumbnail <id> <out-file>
  formats [--all]

Dependencies:
  deps
  check-updates
  install <ytdlp|ffmpeg> [--version V] [--mirror NAME]
  update <ytdlp|ffmpeg> [--mirror NAME]
  set-path <ytdlp|ffmpeg> <path>

Settings:
  settings
  set <key> <json value>
";

/// Positional arguments plus `--flag [value]` options.
struct Args {
    positional: Vec<String>,
    options: Vec<(String, Option<String>)>,
}

impl Args {
    fn parse(raw: impl Iterator<Item = String>) -> Self {
        let mut positional = Vec::new();
        let mut options = Vec::new();
        let mut raw = raw.peekable();

        while let Some(arg) = raw.next() {
            match arg.strip_prefix("--") {
                Some(flag) => {
                    let value = match raw.peek() {
                        Some(next) if !next.starts_with("--") => raw.next(),
                        _ => None,
                    };
                    options.push((flag.to_string(), value));
                }
                None => positional.push(arg),
            }
        }

        Self {
            positional,
            options,
        }
    }

    fn arg(&self, index: usize, name: &str) -> Result<&str> {
        self.positional
            .get(index)
            .map(String::as_str)
            .with_context(|| format!("missing <{}>\n\n{}", name, USAGE))
    }

    fn value(&self, flag: &str) -> Option<String> {
        self.options
            .iter()
            .find(|(name, _)| name == flag)
            .and_then(|(_, value)| value.clone())
    }

    /// Numeric option, `0` when absent.
    fn number(&self, flag: &str) -> Result<u32> {
        match self.value(flag) {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("--{} expects a number, got {:?}", flag, raw)),
            None => Ok(0),
        }
    }

    fn flag(&self, flag: &str) -> bool {
        self.options.iter().any(|(name, _)| name == flag)
    }

    fn dependency(&self, index: usize) -> Result<DependencyType> {
        self.arg(index, "dependency")?
            .parse::<DependencyType>()
            .map_err(anyhow::Error::msg)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tubekit=debug".parse()?)
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting tubekit v{}", tubekit_core::VERSION);

    let args = Args::parse(std::env::args().skip(1));
    let Some(command) = args.positional.first().cloned() else {
        eprint!("{}", USAGE);
        return Ok(());
    };

    let engine = Engine::open().context("Failed to start engine")?;
    engine.initialize().await;

    let ok = run(&engine, &command, &args).await?;
    engine.shutdown().await;

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

async fn run(engine: &Engine, command: &str, args: &Args) -> Result<bool> {
    match command {
        "download" => {
            let request = DownloadRequest {
                url: args.arg(1, "url")?.to_string(),
                browser: args.value("browser").unwrap_or_default(),
                format_id: args.value("format").unwrap_or_default(),
                download_subs: args.flag("subs"),
                sub_langs: args
                    .value("subs")
                    .map(|langs| langs.split(',').map(str::to_string).collect())
                    .unwrap_or_default(),
                sub_format: args.value("sub-format").unwrap_or_default(),
                translate_to: args.value("translate").unwrap_or_default(),
                subtitle_style: args.value("style").unwrap_or_default(),
                recode_format_number: args.number("recode")?,
            };
            let mut events = engine.subscribe();
            let response = engine.start_download(request).await;
            follow(engine, &mut events, response).await
        }
        "quick" => {
            let request = QuickDownloadRequest {
                url: args.arg(1, "url")?.to_string(),
                browser: args.value("browser").unwrap_or_default(),
                video: args.value("format").unwrap_or_else(|| "best".to_string()),
                best_caption: args.flag("captions"),
                recode_format_number: args.number("recode")?,
                task_type: TaskType::Quick,
            };
            let mut events = engine.subscribe();
            let response = engine.quick_download(request).await;
            follow(engine, &mut events, response).await
        }
        "parse" => {
            let url = args.arg(1, "url")?;
            let browser = args.value("browser").unwrap_or_default();
            print(engine.parse_url(url, &browser).await)
        }
        "tasks" => print(engine.list_tasks().await),
        "task" => print(engine.get_task(args.arg(1, "id")?).await),
        "find" => print(engine.find_task_by_url(args.arg(1, "url")?).await),
        "delete" => print(engine.delete_task(args.arg(1, "id")?).await),
        "thumbnail" => {
            let id = args.arg(1, "id")?;
            let out = PathBuf::from(args.arg(2, "out-file")?);
            let response = engine.task_thumbnail(id).await;
            match response.data {
                Some(data) => {
                    std::fs::write(&out, &data)
                        .with_context(|| format!("Failed to write {}", out.display()))?;
                    eprintln!("Wrote {} bytes to {}", data.len(), out.display());
                    Ok(true)
                }
                None => print(response),
            }
        }
        "formats" => {
            if args.flag("all") {
                print(engine.list_conversion_formats())
            } else {
                print(engine.available_conversion_formats())
            }
        }

        "deps" => print(engine.list_dependencies().await),
        "check-updates" => print(engine.check_updates().await),
        "install" | "update" => {
            let dep_type = args.dependency(1)?;
            let config = DownloadConfig {
                version: args.value("version"),
                mirror: args.value("mirror"),
            };

            let mut events = engine.subscribe();
            let printer = tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(event) => print_event(&event),
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    }
                }
            });

            let response = if command == "install" {
                engine.install_dependency(dep_type, config).await
            } else {
                engine.update_dependency(dep_type, config).await
            };
            printer.abort();
            print(response)
        }
        "set-path" => {
            let dep_type = args.dependency(1)?;
            let path = PathBuf::from(args.arg(2, "path")?);
            print(engine.set_dependency_path(dep_type, path).await)
        }

        "settings" => print(engine.get_settings()),
        "set" => {
            let key = args.arg(1, "key")?;
            let raw = args.arg(2, "value")?;
            // Bare words are taken as strings
            let value = serde_json::from_str(raw)
                .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
            print(engine.set_setting(key, value))
        }

        other => bail!("unknown command: {}\n\n{}", other, USAGE),
    }
}

fn print<T: Serialize>(response: CommandResponse<T>) -> Result<bool> {
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(response.success)
}

fn print_event(event: &BusEvent) {
    match &event.payload {
        EventPayload::DependencyProgress(progress) => {
            eprintln!(
                "[{}] {:?} {:.0}%",
                progress.dep_type, progress.stage, progress.percentage
            );
        }
        EventPayload::TaskProgress(progress) => {
            let mut line = format!(
                "[{}] {} {:.1}% {}",
                progress.id, progress.stage, progress.percentage, progress.stage_info
            );
            for part in [&progress.speed, &progress.eta, &progress.error]
                .into_iter()
                .flatten()
            {
                line.push(' ');
                line.push_str(part);
            }
            eprintln!("{}", line);
        }
        EventPayload::TaskInfoReady(signal) => {
            eprintln!("[{}] info ready", signal.task_id);
        }
    }
}

/// Prints events of a started task until it reaches a terminal stage.
async fn follow(
    engine: &Engine,
    events: &mut tokio::sync::broadcast::Receiver<BusEvent>,
    response: CommandResponse<tubekit_core::TaskHandle>,
) -> Result<bool> {
    let Some(handle) = response.data.as_ref() else {
        return print(response);
    };
    let id = handle.task_id.clone();
    eprintln!("Task {} started", id);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Cancelling...");
                engine.shutdown().await;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if event.payload.task_id() != Some(id.as_str()) {
                        continue;
                    }
                    print_event(&event);
                    if let EventPayload::TaskProgress(progress) = &event.payload {
                        if progress.is_terminal() {
                            break;
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event printer lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    print(engine.get_task(&id).await)
}
