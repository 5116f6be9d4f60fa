//! Credential management CLI commands: add-secret, add-oauth, list, revoke.

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use dialoguer::Password;
use uuid::Uuid;

use relay_core::repository::CredentialStore;
use relay_types::credential::Credential;

use crate::state::AppState;

#[derive(Subcommand)]
pub enum CredentialCommand {
    /// Store a static secret (API key, bot token, signing key).
    ///
    /// Omit --value to be prompted with hidden input.
    AddSecret {
        #[arg(long)]
        user: Uuid,

        /// Service provider the secret authorizes (e.g. discord, webhook).
        #[arg(long)]
        provider: String,

        #[arg(long)]
        value: Option<String>,
    },

    /// Store an OAuth2 token pair obtained out of band.
    AddOauth {
        #[arg(long)]
        user: Uuid,

        #[arg(long)]
        provider: String,

        #[arg(long)]
        access_token: Option<String>,

        #[arg(long)]
        refresh_token: Option<String>,

        /// Seconds until the access token expires.
        #[arg(long)]
        expires_in: Option<i64>,
    },

    /// List a user's credentials with masked tokens.
    #[command(alias = "ls")]
    List {
        #[arg(long)]
        user: Uuid,
    },

    /// Mark a credential invalid. Workflows using it fail until it is replaced.
    Revoke { id: Uuid },
}

pub async fn handle_credential_command(
    cmd: CredentialCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    match cmd {
        CredentialCommand::AddSecret {
            user,
            provider,
            value,
        } => {
            let value = prompt_if_missing(value, &format!("Secret for {provider}"))?;
            let credential = Credential::secret(user, &provider, value);
            save(state, &credential, json).await
        }
        CredentialCommand::AddOauth {
            user,
            provider,
            access_token,
            refresh_token,
            expires_in,
        } => {
            let access = prompt_if_missing(access_token, &format!("Access token for {provider}"))?;
            let expires_at = expires_in
                .map(|secs| {
                    if secs <= 0 {
                        bail!("--expires-in must be positive");
                    }
                    Ok(chrono::Utc::now() + chrono::Duration::seconds(secs))
                })
                .transpose()?;
            let credential = Credential::oauth2(user, &provider, access, refresh_token, expires_at);
            save(state, &credential, json).await
        }
        CredentialCommand::List { user } => list(state, user, json).await,
        CredentialCommand::Revoke { id } => {
            state
                .credentials
                .mark_invalid(&id)
                .await
                .with_context(|| format!("Failed to revoke credential {id}"))?;
            if json {
                println!("{}", serde_json::json!({"revoked": true, "id": id}));
            } else {
                println!("  {} Credential {id} revoked", style("*").green().bold());
            }
            Ok(())
        }
    }
}

fn prompt_if_missing(value: Option<String>, prompt: &str) -> Result<String> {
    let value = match value {
        Some(v) => v,
        None => Password::new().with_prompt(prompt).interact()?,
    };
    if value.trim().is_empty() {
        bail!("Token value must not be empty");
    }
    Ok(value)
}

async fn save(state: &AppState, credential: &Credential, json: bool) -> Result<()> {
    state
        .credentials
        .save(credential)
        .await
        .context("Failed to store credential")?;

    if json {
        println!("{}", credential_json(credential));
    } else {
        println!(
            "  {} Stored {} credential for '{}' ({})",
            style("*").green().bold(),
            credential.credential_type,
            style(&credential.service_provider).bold(),
            credential.token.masked()
        );
    }
    Ok(())
}

async fn list(state: &AppState, user: Uuid, json: bool) -> Result<()> {
    let credentials = state.credentials.list(&user).await?;

    if json {
        let entries: Vec<serde_json::Value> = credentials.iter().map(credential_json).collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if credentials.is_empty() {
        println!();
        println!(
            "  {} No credentials stored. Add one with: {}",
            style("i").blue().bold(),
            style("relay credential add-secret --user <uuid> --provider discord").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Provider").fg(Color::White),
        Cell::new("Type").fg(Color::White),
        Cell::new("Token").fg(Color::White),
        Cell::new("Expires").fg(Color::White),
        Cell::new("Valid").fg(Color::White),
        Cell::new("ID").fg(Color::White),
    ]);

    for c in &credentials {
        let valid = if c.is_valid {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(&c.service_provider).fg(Color::Cyan),
            Cell::new(c.credential_type.to_string()),
            Cell::new(c.token.masked()),
            Cell::new(
                c.expires_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".to_string()),
            ),
            valid,
            Cell::new(c.id.to_string()).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

/// JSON view of a credential. Token material is masked.
fn credential_json(c: &Credential) -> serde_json::Value {
    serde_json::json!({
        "id": c.id,
        "userId": c.user_id,
        "serviceProvider": c.service_provider,
        "credentialType": c.credential_type,
        "token": c.token.masked(),
        "hasRefreshToken": c.refresh_token.is_some(),
        "expiresAt": c.expires_at,
        "isValid": c.is_valid,
        "updatedAt": c.updated_at,
    })
}
