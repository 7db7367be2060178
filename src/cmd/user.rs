//! Profile and token management: `dealdesk user`.

use anyhow::{Context, Result};
use dealdesk::config::DealdeskConfig;
use dealdesk::crm::auth::issue_token;
use dealdesk::crm::validation::is_valid_email;

use super::super::UserCommands;

pub fn cmd_user(config: &DealdeskConfig, command: UserCommands) -> Result<()> {
    let db = super::open_db(config)?;

    match command {
        UserCommands::Add { name, email } => {
            let name = name.trim();
            let email = email.trim();
            if name.is_empty() {
                anyhow::bail!("--name must not be empty");
            }
            if !is_valid_email(email) {
                anyhow::bail!("--email must be an email address, got '{}'", email);
            }
            if db.find_profile_by_email(email)?.is_some() {
                anyhow::bail!(
                    "A profile for {} already exists. Use 'dealdesk user token {}' for a new token.",
                    email,
                    email
                );
            }

            let profile = db.create_profile(name, email)?;
            let token = issue_token(&db, profile.id, "cli")?;
            tracing::info!(user_id = profile.id, "profile created");

            println!("Created profile #{} for {} <{}>", profile.id, profile.full_name, profile.email);
            println!("Default pipeline stages added.");
            println!();
            println!("API token (shown once):");
            println!("  {}", token);
        }
        UserCommands::List => {
            let profiles = db.list_profiles()?;
            if profiles.is_empty() {
                println!("No profiles yet. Run 'dealdesk user add'.");
                return Ok(());
            }
            for p in profiles {
                println!("{:>4}  {:<24}  {}", p.id, p.full_name, p.email);
            }
        }
        UserCommands::Token { email, label } => {
            let profile = db
                .find_profile_by_email(email.trim())?
                .with_context(|| format!("No profile with email {}", email))?;
            let token = issue_token(&db, profile.id, &label)?;
            println!("API token for {} (shown once):", profile.email);
            println!("  {}", token);
        }
    }

    Ok(())
}
