use anyhow::{Context, Result};
use hlcore::Language;
use log::LevelFilter;
use quillpad::recovery_area::DirRecoveryArea;
use quillpad::settings::JsonFileSettings;
use quillpad::{
    Config, EditorError, IntervalScheduler, RecoveryOffer, RecoveryOutcome, SessionController,
    SessionEvent,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

type Input = Lines<BufReader<Stdin>>;

enum Flow {
    Continue,
    Quit,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut logger = env_logger::Builder::from_default_env();
    if std::env::var_os("RUST_LOG").is_none() {
        logger.filter_level(LevelFilter::Info);
        logger.filter_module("quillpad", LevelFilter::Debug);
    }
    logger.init();

    let config = Config::load().await.context("failed to load configuration")?;
    let data_dir = Config::data_dir()?;
    let settings = JsonFileSettings::open(data_dir.join("settings.json"))
        .await
        .context("failed to open the settings store")?;
    let recovery_area = DirRecoveryArea::new(data_dir.join("recovery"));

    let mut controller =
        SessionController::new(config, Arc::new(settings), Arc::new(recovery_area));
    controller.events().subscribe(|event| match event {
        SessionEvent::LowMemoryDetected { available_bytes } => {
            println!(
                "warning: low memory ({} MiB available), work auto-saved",
                available_bytes / (1024 * 1024)
            );
        }
        other => log::debug!("{:?}", other),
    });

    let mut input: Input = BufReader::new(tokio::io::stdin()).lines();
    let prompt_input = &mut input;
    let report = controller
        .startup(move |offer| ask_recovery(prompt_input, offer))
        .await
        .context("startup failed")?;
    if let RecoveryOutcome::Recovered { skipped, .. } = &report.recovery {
        for error in skipped {
            println!("warning: {}", error);
        }
    }
    log::info!("Startup complete ({} tabs restored)", report.restored_tabs);

    for arg in std::env::args().skip(1) {
        if let Err(e) = controller.open_file(PathBuf::from(&arg)).await {
            log::error!("Failed to load file '{}': {}", arg, e);
            println!("error: {}", e);
        }
    }

    let mut scheduler = IntervalScheduler::new();
    controller.start(&mut scheduler);
    print_tabs(&controller);

    loop {
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line? else {
                    log::info!("Input closed; leaving the recovery snapshot in place");
                    break;
                };
                match run_command(&mut controller, line.trim()).await {
                    Ok(Flow::Quit) => break,
                    Ok(Flow::Continue) => {}
                    Err(e) => println!("error: {}", e),
                }
            }
            job = scheduler.next_due() => {
                if let Err(e) = controller.run_job(job).await {
                    log::error!("{:?} job failed: {}", job, e);
                }
            }
        }
    }

    log::info!("Application loop ended");
    Ok(())
}

async fn ask_recovery(input: &mut Input, offer: RecoveryOffer) -> bool {
    let question = format!(
        "Recover {} tab(s) from an unexpected exit at {}? [y/N] ",
        offer.tab_count,
        offer.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let mut stdout = tokio::io::stdout();
    let _ = stdout.write_all(question.as_bytes()).await;
    let _ = stdout.flush().await;

    match input.next_line().await {
        Ok(Some(answer)) => matches!(answer.trim(), "y" | "Y" | "yes"),
        _ => false,
    }
}

fn active(controller: &SessionController) -> Result<usize, EditorError> {
    controller.active_index().ok_or(EditorError::Index { index: 0, count: 0 })
}

/// Optional tab number argument, defaulting to the active tab.
fn tab_arg(controller: &SessionController, arg: &str) -> Result<usize> {
    if arg.is_empty() {
        return Ok(active(controller)?);
    }
    arg.parse()
        .with_context(|| format!("'{}' is not a tab number", arg))
}

fn unescape(text: &str) -> String {
    text.replace("\\n", "\n").replace("\\t", "\t")
}

fn print_tabs(controller: &SessionController) {
    for (index, document) in controller.documents().iter().enumerate() {
        let marker = if controller.active_index() == Some(index) {
            '>'
        } else {
            ' '
        };
        println!(
            "{} {:>2} {} [{}]",
            marker,
            index,
            document.tab_label(),
            document.language()
        );
    }
}

async fn run_command(controller: &mut SessionController, line: &str) -> Result<Flow> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        "" => {}
        "new" => {
            controller.create_document();
            print_tabs(controller);
        }
        "open" => {
            controller.open_file(PathBuf::from(rest)).await?;
            print_tabs(controller);
        }
        "save" => {
            let index = tab_arg(controller, rest)?;
            if !controller.save_document(index).await? {
                println!("tab {} has no file name; use saveas <path>", index);
            }
        }
        "saveas" => {
            let index = active(controller)?;
            controller.save_document_as(index, PathBuf::from(rest)).await?;
            print_tabs(controller);
        }
        "close" | "close!" => {
            let index = tab_arg(controller, rest)?;
            controller.close_document(index, command == "close!")?;
            print_tabs(controller);
        }
        "closeall" | "closeall!" | "closeothers" | "closeothers!" | "closeright"
        | "closeright!" => {
            let force = command.ends_with('!');
            let report = match command.trim_end_matches('!') {
                "closeall" => controller.close_all(force)?,
                "closeothers" => controller.close_others(tab_arg(controller, rest)?, force)?,
                _ => controller.close_to_the_right(tab_arg(controller, rest)?, force)?,
            };
            println!("{} tab(s) closed", report.closed);
            if let Some(reason) = report.stopped {
                println!("stopped: {}", reason);
            }
            print_tabs(controller);
        }
        "switch" => {
            controller.switch_active(tab_arg(controller, rest)?)?;
            print_tabs(controller);
        }
        "tabs" => print_tabs(controller),
        "lang" => {
            let index = active(controller)?;
            if rest.is_empty() {
                controller.detect_language(index)?;
            } else {
                controller.set_language(index, Language::from_tag(rest))?;
            }
            println!("{}", controller.document(index)?.language());
        }
        "spans" => {
            let index = active(controller)?;
            let line: usize = rest.parse().unwrap_or(0);
            for span in controller.highlight_spans(index, line)? {
                println!("{}+{} {:?}", span.start, span.len, span.style);
            }
            println!("carry: {:?}", controller.line_carry(index, line)?);
        }
        "insert" => {
            let index = active(controller)?;
            let cursor = controller.document(index)?.cursor();
            controller.insert_text(index, cursor, &unescape(rest))?;
        }
        "replace" => {
            let index = active(controller)?;
            let (needle, replacement) = rest.split_once(' ').unwrap_or((rest, ""));
            let count = controller.replace_all(index, needle, &unescape(replacement), true)?;
            println!("{} replaced", count);
        }
        "show" => {
            let index = active(controller)?;
            print!("{}", controller.document(index)?.content());
            println!();
        }
        "recent" => {
            for path in controller.recent_files().await? {
                println!("{}", path.display());
            }
        }
        "autosave" => {
            let report = controller.autosave_tick().await?;
            println!("{} document(s) auto-saved", report.written);
        }
        "quit" | "quit!" => {
            if command == "quit" && controller.has_unsaved_changes() {
                println!(
                    "unsaved changes in tab(s) {:?}; save them or use quit!",
                    controller.unsaved_documents()
                );
                return Ok(Flow::Continue);
            }
            controller.shutdown_clean().await?;
            return Ok(Flow::Quit);
        }
        other => println!("unknown command: {}", other),
    }

    Ok(Flow::Continue)
}
