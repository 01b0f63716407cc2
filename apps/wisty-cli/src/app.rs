//! Drives one open (and optional save) through the transfer engine.

use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wisty_file_lifecycle::{
    AutoConfirm, EditorDocument, ErrorCode, FileError, FileLifecycle, OpenOutcome, SaveOutcome,
    TransferEngine, TransferEvent,
};
use wisty_transfer::{LaunchFileArg, LaunchStreamRegistry, SaveStreamRegistry};

use crate::Args;
use crate::config::Config;

pub async fn run(args: Args, config: Config) -> anyhow::Result<()> {
    let document = Arc::new(EditorDocument::new());
    let engine = Arc::new(TransferEngine::new(
        Arc::clone(&document),
        config.transfer.clone(),
    ));

    let printer = engine
        .take_events()
        .map(|rx| tokio::spawn(print_events(rx, args.json)));

    let mut lifecycle = FileLifecycle::new(Arc::clone(&engine));
    if args.launch {
        lifecycle = lifecycle
            .with_launch_port(Arc::new(LaunchStreamRegistry::new()))
            .with_save_port(Arc::new(SaveStreamRegistry::new()));
    }

    let cancel_engine = Arc::clone(&engine);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling transfers");
            cancel_engine.request_cancel();
            cancel_engine.request_cancel_save();
        }
    });

    let result = drive(&lifecycle, &args, &config).await;

    interrupt.abort();
    let _ = interrupt.await;
    // Dropping the last engine handle closes the event channel.
    drop(lifecycle);
    drop(engine);
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    result
}

async fn drive(lifecycle: &FileLifecycle, args: &Args, config: &Config) -> anyhow::Result<()> {
    let prompt = AutoConfirm(args.yes || config.confirm_large_files);

    let (opened, operation) = if args.launch {
        let arg = LaunchFileArg::probe(args.path.as_str()).await;
        debug!(?arg, "launch argument probed");
        (
            lifecycle.open_launch_arg(&arg, &prompt).await,
            ErrorCode::LaunchOpenFailed,
        )
    } else {
        (
            lifecycle.open_path(&args.path, &prompt).await,
            ErrorCode::OpenFailed,
        )
    };

    let outcome = match opened {
        Ok(outcome) => outcome,
        Err(e) => return Err(fail(&e, operation, "Failed to open file", args.json)),
    };
    emit(&outcome, args.json)?;

    match outcome {
        OpenOutcome::Opened(_) | OpenOutcome::Created { .. } => {}
        OpenOutcome::Declined | OpenOutcome::Cancelled => {
            info!("nothing opened");
            return Ok(());
        }
    }

    let document = lifecycle.engine().document();
    if let Some(text) = &args.append {
        document.with_buffer(|b| {
            let end = b.len_chars();
            b.type_text(end, text);
        });
    }
    emit(&document.state(), args.json)?;

    let saved = if let Some(target) = &args.save_to {
        lifecycle.save_as(target).await
    } else if args.save {
        lifecycle.save().await
    } else {
        return Ok(());
    };

    match saved {
        Ok(SaveOutcome::NeedsPath) => {
            anyhow::bail!("document is untitled; pass --save-to <PATH>")
        }
        Ok(outcome) => {
            emit(&outcome, args.json)?;
            emit(&document.state(), args.json)?;
            Ok(())
        }
        Err(e) => Err(fail(&e, ErrorCode::SaveFailed, "Failed to save file", args.json)),
    }
}

fn fail(error: &FileError, operation: ErrorCode, context: &str, json: bool) -> anyhow::Error {
    let report = error.report(operation, context);
    if json {
        if let Ok(line) = serde_json::to_string(&report) {
            eprintln!("{line}");
        }
    }
    anyhow::anyhow!("{}: {}", report.context, report.message)
}

fn emit<T: Serialize + std::fmt::Debug>(value: &T, json: bool) -> anyhow::Result<()> {
    if json {
        let line = serde_json::to_string(value).context("serialize output")?;
        println!("{line}");
    } else {
        println!("{value:#?}");
    }
    Ok(())
}

async fn print_events(mut rx: mpsc::Receiver<TransferEvent>, json: bool) {
    while let Some(event) = rx.recv().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "failed to serialize event"),
            }
        } else {
            debug!(?event, "transfer event");
        }
    }
}
