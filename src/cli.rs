use clap::{Parser, Subcommand};

/// hermes — multi-tenant API gateway control plane
#[derive(Parser)]
#[command(name = "hermes", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the control plane server
    Serve,

    /// Manage API credentials
    Credential {
        #[command(subcommand)]
        command: CredentialCommands,
    },

    /// Manage built-in users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Manage the built-in JWT signing key
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },
}

#[derive(Subcommand)]
pub enum CredentialCommands {
    /// Mint a new API credential
    Create {
        #[arg(long, default_value = "default")]
        namespace: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Comma-separated scope list
        #[arg(long, value_delimiter = ',')]
        scopes: Vec<String>,
    },
    /// List API credentials (metadata only, no secret)
    List {
        #[arg(long, default_value = "default")]
        namespace: String,
    },
    /// Revoke (delete) an API credential
    Revoke {
        #[arg(long)]
        namespace: String,
        #[arg(long)]
        id: String,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create a built-in admin user
    CreateAdmin {
        #[arg(long)]
        email: String,
        #[arg(long)]
        username: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long)]
        password: String,
    },
    /// Reset a built-in user's password
    SetPassword {
        #[arg(long)]
        sub: String,
        #[arg(long)]
        password: String,
    },
}

#[derive(Subcommand)]
pub enum KeyCommands {
    /// Retire the active signing key (with a grace period) and mint a new one
    Rotate,
}
