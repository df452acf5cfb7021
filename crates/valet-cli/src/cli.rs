use clap::{Args, Parser, Subcommand};
use valet_core::Accessibility;

use crate::config::Backend;

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "valet",
    about = "Read and write entries in the platform credential store",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub target: TargetArgs,
    #[command(subcommand)]
    pub command: Command,
}

/// Which configuration the store commands act on. Unset options fall back to
/// the config file.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetArgs {
    /// Namespace identifier for entries private to this application.
    #[arg(long, global = true)]
    pub identifier: Option<String>,
    /// Shared access group; entries are visible to every entitled application.
    #[arg(long, global = true, conflicts_with = "identifier")]
    pub shared_group: Option<String>,
    /// Accessibility policy, e.g. `when-unlocked` or `after-first-unlock-this-device-only`.
    #[arg(long, global = true)]
    pub accessibility: Option<Accessibility>,
    /// Synchronize entries across devices.
    #[arg(long, global = true)]
    pub synchronizable: bool,
    /// Keep entries in secure hardware behind a user-presence check.
    #[arg(long, global = true, conflicts_with = "synchronizable")]
    pub secure_enclave: bool,
    /// Text shown in the user-presence prompt (secure enclave only).
    #[arg(long, global = true, requires = "secure_enclave")]
    pub prompt: Option<String>,
    /// Keychain backend to use.
    #[arg(long, global = true, value_enum)]
    pub backend: Option<Backend>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    #[command(flatten)]
    Store(StoreCommand),
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version and exit.
    Version,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum StoreCommand {
    /// Store a string value under a key, replacing any previous value.
    Set { key: String, value: String },
    /// Print the string value stored under a key.
    Get { key: String },
    /// Print whether a key has a value.
    Has { key: String },
    /// List every key of the configuration.
    Keys,
    /// Remove a key (succeeds when absent).
    Remove { key: String },
    /// Remove every key of the configuration.
    Clear,
    /// Check that the configuration is usable on this device.
    Check,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_set_subcommand() {
        let cli = Cli::try_parse_from(["valet", "set", "token", "secret"]).expect("parse");
        assert_eq!(
            cli.command,
            Command::Store(StoreCommand::Set {
                key: "token".into(),
                value: "secret".into()
            })
        );
        assert_eq!(cli.target, TargetArgs::default());
    }

    #[test]
    fn parses_target_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "valet",
            "keys",
            "--shared-group",
            "team.shared",
            "--accessibility",
            "after-first-unlock",
            "--synchronizable",
            "--backend",
            "file",
        ])
        .expect("parse");
        assert_eq!(cli.command, Command::Store(StoreCommand::Keys));
        assert_eq!(cli.target.shared_group.as_deref(), Some("team.shared"));
        assert_eq!(cli.target.accessibility, Some(Accessibility::AfterFirstUnlock));
        assert!(cli.target.synchronizable);
        assert_eq!(cli.target.backend, Some(Backend::File));
    }

    #[test]
    fn rejects_unknown_accessibility() {
        assert!(Cli::try_parse_from(["valet", "keys", "--accessibility", "sometimes"]).is_err());
    }

    #[test]
    fn secure_enclave_conflicts_with_synchronizable() {
        assert!(
            Cli::try_parse_from(["valet", "check", "--secure-enclave", "--synchronizable"])
                .is_err()
        );
    }

    #[test]
    fn prompt_requires_secure_enclave() {
        assert!(Cli::try_parse_from(["valet", "get", "pin", "--prompt", "Show PIN"]).is_err());

        let cli = Cli::try_parse_from([
            "valet",
            "get",
            "pin",
            "--secure-enclave",
            "--prompt",
            "Show PIN",
        ])
        .expect("parse");
        assert!(cli.target.secure_enclave);
        assert_eq!(cli.target.prompt.as_deref(), Some("Show PIN"));
    }

    #[test]
    fn parses_config_init_subcommand() {
        let cli = Cli::try_parse_from(["valet", "config", "init"]).expect("parse should succeed");
        assert_eq!(cli.command, Command::Config(ConfigCommand::Init));
    }
}
