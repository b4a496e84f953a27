//! Interactive prompts: main menu, setup wizard, document browser.
//!
//! Every prompt here is skippable with ESC; a skipped selection returns
//! `None` and the caller backs out without side effects.
use crate::api::{BranchSummary, DocumentSummary, RemoteApi};
use crate::config::{is_placeholder, AppPaths, DocumentConfig};
use crate::context::{DocumentContext, Mode};
use crate::vault::{self, Credentials};
use anyhow::{Context, Result};
use inquire::{Confirm, MultiSelect, Password, PasswordDisplayMode, Select, Text};
use std::fmt;
use zeroize::Zeroizing;

const RECENT_DOCUMENTS: usize = 20;
const CLEAN_BEFORE: &str = "Clean before export (delete existing DXFs/PDFs)";
const CLEAN_AFTER: &str = "Clean after export (remove generated files from document)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Export,
    Setup,
    Quit,
}

impl fmt::Display for MenuChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MenuChoice::Export => "Export a document",
            MenuChoice::Setup => "Run setup wizard (reconfigure credentials/document)",
            MenuChoice::Quit => "Quit",
        })
    }
}

pub fn header(title: &str) {
    let rule = "=".repeat(60);
    println!("\n{rule}\n{title:^60}\n{rule}");
}

fn section(title: &str) {
    println!("\n--- {title} ---");
}

pub fn main_menu() -> Result<MenuChoice> {
    let choices = vec![MenuChoice::Export, MenuChoice::Setup, MenuChoice::Quit];
    let choice = Select::new("What would you like to do?", choices)
        .with_help_message("↑↓ to move, ENTER to select, ESC to quit")
        .prompt_skippable()?;
    Ok(choice.unwrap_or(MenuChoice::Quit))
}

/// Ask for the vault password, twice when creating a new one.
pub fn prompt_password(message: &str, confirm: bool) -> Result<Zeroizing<String>> {
    let prompt = Password::new(message).with_display_mode(PasswordDisplayMode::Masked);
    let prompt = if confirm {
        prompt.with_custom_confirmation_message("Confirm password:")
    } else {
        prompt.without_confirmation()
    };
    Ok(Zeroizing::new(prompt.prompt()?))
}

fn prompt_credentials() -> Result<Credentials> {
    println!("Enter your Onshape API keys (from the Developer Portal).");
    let access_key = Text::new("Access key:").prompt()?;
    let secret_key = Zeroizing::new(
        Password::new("Secret key:")
            .with_display_mode(PasswordDisplayMode::Masked)
            .without_confirmation()
            .prompt()?,
    );
    Ok(Credentials::new(access_key.trim(), secret_key.trim()))
}

/// Create or rotate the credential vault, then pick the default document.
pub fn setup_wizard(paths: &AppPaths) -> Result<()> {
    header("ONSHAPE EXPORT - SETUP");
    std::fs::create_dir_all(paths.home())
        .with_context(|| format!("create {}", paths.home().display()))?;

    section("Step 1: API credentials");
    let secrets_path = paths.secrets();
    match vault::load_record(&secrets_path)? {
        Some(record) => {
            println!("Credentials already stored in {}", secrets_path.display());
            if Confirm::new("Change the vault password?")
                .with_default(false)
                .prompt()?
            {
                let old = prompt_password("Current vault password:", false)?;
                let new = prompt_password("New vault password:", true)?;
                let rotated = vault::rotate(&old, &new, &record)?;
                vault::save_record(&secrets_path, &rotated)?;
                println!("Vault password changed.");
            }
        }
        None => {
            let credentials = prompt_credentials()?;
            let password = prompt_password("Choose a vault password:", true)?;
            let record = vault::setup(&password, &credentials)?;
            vault::save_record(&secrets_path, &record)?;
            println!("Saved encrypted credentials to {}", secrets_path.display());
        }
    }

    section("Step 2: Default document");
    println!("The ids are in the document URL:");
    println!("  https://cad.onshape.com/documents/<documentId>/w/<workspaceId>/...");
    let config_path = paths.config();
    let mut config = DocumentConfig::load(&config_path)?;
    let document_id = Text::new("Document id:")
        .with_help_message("leave empty to skip")
        .prompt()?;
    if is_placeholder(&document_id) {
        println!("No default document saved.");
    } else {
        let workspace_id = Text::new("Workspace id:").prompt()?;
        // Validate before writing anything.
        DocumentContext::workspace(document_id.trim(), workspace_id.trim())?;
        config.document_id = Some(document_id.trim().to_string());
        config.workspace_id = Some(workspace_id.trim().to_string());
        config.version_id = None;
        config.save(&config_path)?;
        println!("Saved document config to {}", config_path.display());
    }

    header("SETUP COMPLETE");
    println!("Run `onshape-export` to export the configured document.");
    Ok(())
}

struct DocumentChoice(DocumentSummary);

impl fmt::Display for DocumentChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let modified = self
            .0
            .modified_at
            .as_deref()
            .map(|stamp| stamp.get(..10).unwrap_or(stamp))
            .unwrap_or("unknown");
        write!(f, "{} (modified: {modified})", self.0.name)
    }
}

struct BranchChoice {
    mode: Mode,
    branch: BranchSummary,
}

impl fmt::Display for BranchChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.mode {
            Mode::Workspace => "WORKSPACE",
            Mode::Version => "VERSION",
        };
        write!(f, "[{kind}] {}", self.branch.name)
    }
}

/// Browse recent documents and pick a workspace or version.
pub fn choose_document(api: &dyn RemoteApi) -> Result<Option<DocumentContext>> {
    section("Select document");
    println!("Fetching recent documents...");
    let documents: Vec<DocumentChoice> = api
        .list_documents(RECENT_DOCUMENTS)?
        .into_iter()
        .map(DocumentChoice)
        .collect();
    if documents.is_empty() {
        println!("No documents found.");
        return Ok(None);
    }
    let Some(DocumentChoice(document)) = Select::new("Select a document:", documents)
        .with_page_size(10)
        .prompt_skippable()?
    else {
        return Ok(None);
    };

    section("Select workspace or version");
    let workspaces = api.list_workspaces(&document.id)?;
    let versions = api.list_versions(&document.id)?;
    let branches: Vec<BranchChoice> = workspaces
        .into_iter()
        .map(|branch| BranchChoice {
            mode: Mode::Workspace,
            branch,
        })
        .chain(versions.into_iter().map(|branch| BranchChoice {
            mode: Mode::Version,
            branch,
        }))
        .collect();
    if branches.is_empty() {
        println!("No workspaces or versions found.");
        return Ok(None);
    }
    let Some(choice) = Select::new("Select workspace or version:", branches)
        .with_page_size(10)
        .prompt_skippable()?
    else {
        return Ok(None);
    };
    println!("Selected {choice} of '{}'", document.name);

    let ctx = match choice.mode {
        Mode::Workspace => DocumentContext::workspace(&document.id, &choice.branch.id)?,
        Mode::Version => DocumentContext::version(&document.id, &choice.branch.id)?,
    };
    Ok(Some(ctx))
}

/// Toggle clean-before/clean-after; versions cannot be cleaned.
pub fn choose_clean_options(ctx: &DocumentContext) -> Result<(bool, bool)> {
    section("Export options");
    if !ctx.is_mutable() {
        println!("Clean options are not available for version exports (read-only).");
        return Ok((false, false));
    }
    let picked = MultiSelect::new("Options:", vec![CLEAN_BEFORE, CLEAN_AFTER])
        .with_help_message("SPACE to toggle, ENTER to continue")
        .prompt_skippable()?
        .unwrap_or_default();
    Ok((picked.contains(&CLEAN_BEFORE), picked.contains(&CLEAN_AFTER)))
}
