use anyhow::{anyhow, Context, Result};
use clap::Parser;
use onshape_export::api::http::HttpApi;
use onshape_export::cli::{Action, Args};
use onshape_export::config::{AppPaths, DocumentConfig, PASSWORD_ENV};
use onshape_export::context::DocumentContext;
use onshape_export::retry::CancelToken;
use onshape_export::ui::{self, MenuChoice};
use onshape_export::vault::{self, Credentials};
use onshape_export::workflow::{self, ExportSettings};
use onshape_export::ExportError;
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

const CRITICAL_LOG: &str = "critical_error.log";

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(&args) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: &Args) -> Result<u8> {
    let paths = AppPaths::resolve()?;
    let config_path = paths.config();
    let config =
        DocumentConfig::load(&config_path).with_context(|| format!("load {}", config_path.display()))?;

    match args.action(&config)? {
        Action::Setup => {
            ui::setup_wizard(&paths)?;
            Ok(0)
        }
        Action::Export(ctx) => {
            let credentials = unlock(&paths)?;
            let api = HttpApi::new(&credentials, &config.api_base());
            export(&api, ctx, &args.settings(&config))
        }
        Action::Interactive => interactive(args, &paths, &config),
    }
}

fn interactive(args: &Args, paths: &AppPaths, config: &DocumentConfig) -> Result<u8> {
    ui::header("ONSHAPE EXPORT");
    if vault::load_record(&paths.secrets())?.is_none() {
        println!("No API credentials found. Running first-time setup...");
        ui::setup_wizard(paths)?;
        return Ok(0);
    }
    match ui::main_menu()? {
        MenuChoice::Quit => {
            println!("Goodbye!");
            Ok(0)
        }
        MenuChoice::Setup => {
            ui::setup_wizard(paths)?;
            Ok(0)
        }
        MenuChoice::Export => {
            let credentials = unlock(paths)?;
            let api = HttpApi::new(&credentials, &config.api_base());
            let Some(ctx) = ui::choose_document(&api)? else {
                println!("Cancelled.");
                return Ok(0);
            };
            let (clean_before, clean_after) = ui::choose_clean_options(&ctx)?;
            let settings = ExportSettings {
                clean_before,
                clean_after,
                ..args.settings(config)
            };
            export(&api, ctx, &settings)
        }
    }
}

fn unlock(paths: &AppPaths) -> Result<Credentials> {
    let secrets_path = paths.secrets();
    let record = vault::load_record(&secrets_path)?.ok_or_else(|| {
        anyhow!(
            "no credentials at {}; run `onshape-export --setup`",
            secrets_path.display()
        )
    })?;
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(password) if !password.is_empty() => Zeroizing::new(password),
        _ => ui::prompt_password("Vault password:", false)?,
    };
    Ok(vault::unlock(&password, &record)?)
}

fn export(api: &HttpApi, ctx: DocumentContext, settings: &ExportSettings) -> Result<u8> {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("install ctrl-c handler")?;

    match workflow::run(api, ctx, settings, cancel) {
        Ok(outcome) => {
            print!("{}", outcome.summary.render());
            if let Some(failure) = outcome.summary.failure() {
                let level = if outcome.summary.all_failed() {
                    "error"
                } else {
                    "warning"
                };
                eprintln!("{level}: {failure}");
            }
            Ok(outcome.summary.exit_code())
        }
        Err(err) => {
            record_critical_error(&settings.out_dir, &err);
            Err(err.into())
        }
    }
}

fn record_critical_error(out_dir: &Path, err: &ExportError) {
    let path = out_dir.join(CRITICAL_LOG);
    let text = format!(
        "{} - export aborted: {err}\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    let written = std::fs::create_dir_all(out_dir).and_then(|()| std::fs::write(&path, text));
    if let Err(io_err) = written {
        tracing::warn!(path = %path.display(), error = %io_err, "could not write critical error log");
    } else {
        eprintln!("details written to {}", path.display());
    }
}
