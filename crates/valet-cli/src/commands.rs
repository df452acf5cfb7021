use std::collections::BTreeSet;

use color_eyre::Result;
use tracing::instrument;
use valet_core::{
    Accessibility, Flavor, Keychain, Scope, SecureEnclaveValet, Valet, ValetConfig, ValetError,
};

use crate::{
    cli::{StoreCommand, TargetArgs},
    config::Config,
    storage,
};

const DEFAULT_IDENTIFIER: &str = "valet-cli";

/// Facade matching the requested flavor.
pub enum Facade<K: Keychain> {
    Plain(Valet<K>),
    SecureEnclave(SecureEnclaveValet<K>),
}

/// Result of a store command, ready to print.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Value(String),
    Present(bool),
    Keys(BTreeSet<String>),
    Accessible(bool),
}

impl<K: Keychain> Facade<K> {
    pub fn new(config: ValetConfig, keychain: K) -> Result<Self, ValetError> {
        match config.flavor {
            Flavor::SecureEnclave => Ok(Facade::SecureEnclave(SecureEnclaveValet::from_config(
                config, keychain,
            )?)),
            Flavor::Standard | Flavor::Synchronizable => {
                Ok(Facade::Plain(Valet::from_config(config, keychain)?))
            }
        }
    }

    #[instrument(skip_all)]
    pub fn execute(
        &self,
        command: &StoreCommand,
        prompt: Option<&str>,
    ) -> Result<Outcome, ValetError> {
        match (self, command) {
            (Facade::Plain(valet), StoreCommand::Set { key, value }) => {
                valet.set_string(key, value).map(|_| Outcome::Done)
            }
            (Facade::SecureEnclave(valet), StoreCommand::Set { key, value }) => valet
                .set_string(key, value, prompt)
                .map(|_| Outcome::Done),
            (Facade::Plain(valet), StoreCommand::Get { key }) => {
                valet.get_string(key).map(Outcome::Value)
            }
            (Facade::SecureEnclave(valet), StoreCommand::Get { key }) => {
                valet.get_string(key, prompt).map(Outcome::Value)
            }
            (_, StoreCommand::Has { key }) => self.valet().has_key(key).map(Outcome::Present),
            (_, StoreCommand::Keys) => self.valet().all_keys().map(Outcome::Keys),
            (_, StoreCommand::Remove { key }) => self.valet().remove(key).map(|_| Outcome::Done),
            (_, StoreCommand::Clear) => self.valet().remove_all().map(|_| Outcome::Done),
            (_, StoreCommand::Check) => Ok(Outcome::Accessible(self.valet().can_access_keychain())),
        }
    }

    fn valet(&self) -> &Valet<K> {
        match self {
            Facade::Plain(valet) => valet,
            Facade::SecureEnclave(valet) => valet.as_valet(),
        }
    }
}

/// Merge command-line options over config-file defaults.
pub fn resolve_valet_config(target: &TargetArgs, config: &Config) -> ValetConfig {
    let scope = match &target.shared_group {
        Some(group) => Scope::SharedAccessGroup(group.clone()),
        None => Scope::App(
            target
                .identifier
                .clone()
                .or_else(|| config.identifier.clone())
                .unwrap_or_else(|| DEFAULT_IDENTIFIER.to_string()),
        ),
    };

    let flavor = if target.secure_enclave {
        Flavor::SecureEnclave
    } else if target.synchronizable {
        Flavor::Synchronizable
    } else {
        Flavor::Standard
    };

    let accessibility = target
        .accessibility
        .or(config.accessibility)
        .unwrap_or(match flavor {
            Flavor::SecureEnclave => Accessibility::WhenPasscodeSetThisDeviceOnly,
            Flavor::Standard | Flavor::Synchronizable => Accessibility::default(),
        });

    ValetConfig::new(scope, accessibility, flavor)
}

/// Execute a store subcommand against the configured backend.
pub async fn handle(command: StoreCommand, target: &TargetArgs, config: &Config) -> Result<()> {
    let backend = target.backend.or(config.backend).unwrap_or_default();
    let keychain = storage::keychain_for(backend, config)?;
    let facade = Facade::new(resolve_valet_config(target, config), keychain)?;
    let prompt = target.prompt.clone();

    // Store calls block, possibly on a presence prompt.
    let outcome =
        tokio::task::spawn_blocking(move || facade.execute(&command, prompt.as_deref())).await??;
    print_outcome(outcome)
}

fn print_outcome(outcome: Outcome) -> Result<()> {
    match outcome {
        Outcome::Done => {}
        Outcome::Value(value) => println!("{value}"),
        Outcome::Present(present) => println!("{present}"),
        Outcome::Keys(keys) => {
            for key in keys {
                println!("{key}");
            }
        }
        Outcome::Accessible(true) => println!("Keychain: ok"),
        Outcome::Accessible(false) => {
            color_eyre::eyre::bail!("keychain is not accessible with this configuration")
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use valet_core::InMemoryKeychain;

    use super::*;

    fn facade(target: &TargetArgs, keychain: &InMemoryKeychain) -> Facade<InMemoryKeychain> {
        Facade::new(resolve_valet_config(target, &Config::default()), keychain.clone())
            .expect("valid configuration")
    }

    #[test]
    fn resolves_defaults_and_overrides() {
        let config = Config {
            identifier: Some("from-file".into()),
            accessibility: Some(Accessibility::Always),
            ..Config::default()
        };

        let resolved = resolve_valet_config(&TargetArgs::default(), &config);
        assert_eq!(resolved.scope, Scope::App("from-file".into()));
        assert_eq!(resolved.accessibility, Accessibility::Always);
        assert_eq!(resolved.flavor, Flavor::Standard);

        let target = TargetArgs {
            shared_group: Some("team.shared".into()),
            synchronizable: true,
            ..TargetArgs::default()
        };
        let resolved = resolve_valet_config(&target, &config);
        assert_eq!(resolved.scope, Scope::SharedAccessGroup("team.shared".into()));
        assert_eq!(resolved.flavor, Flavor::Synchronizable);
    }

    #[test]
    fn secure_enclave_defaults_to_passcode_policy() {
        let target = TargetArgs {
            secure_enclave: true,
            ..TargetArgs::default()
        };
        let resolved = resolve_valet_config(&target, &Config::default());
        assert_eq!(resolved.accessibility, Accessibility::WhenPasscodeSetThisDeviceOnly);
        assert_eq!(resolved.scope, Scope::App(DEFAULT_IDENTIFIER.into()));
    }

    #[test]
    fn invalid_combination_is_rejected() {
        let target = TargetArgs {
            synchronizable: true,
            accessibility: Some(Accessibility::AlwaysThisDeviceOnly),
            ..TargetArgs::default()
        };
        let result = Facade::new(
            resolve_valet_config(&target, &Config::default()),
            InMemoryKeychain::new(),
        );
        assert!(matches!(result, Err(ValetError::InvalidConfiguration { .. })));
    }

    #[test]
    fn executes_store_commands() {
        let keychain = InMemoryKeychain::new();
        let facade = facade(&TargetArgs::default(), &keychain);
        let set = StoreCommand::Set {
            key: "token".into(),
            value: "secret".into(),
        };

        assert_eq!(facade.execute(&set, None), Ok(Outcome::Done));
        assert_eq!(
            facade.execute(&StoreCommand::Get { key: "token".into() }, None),
            Ok(Outcome::Value("secret".into()))
        );
        assert_eq!(
            facade.execute(&StoreCommand::Has { key: "token".into() }, None),
            Ok(Outcome::Present(true))
        );
        assert_eq!(
            facade.execute(&StoreCommand::Keys, None),
            Ok(Outcome::Keys(BTreeSet::from(["token".to_string()])))
        );
        assert_eq!(facade.execute(&StoreCommand::Clear, None), Ok(Outcome::Done));
        assert_eq!(
            facade.execute(&StoreCommand::Get { key: "token".into() }, None),
            Err(ValetError::NotFound {
                key: "token".into()
            })
        );
        assert_eq!(
            facade.execute(&StoreCommand::Check, None),
            Ok(Outcome::Accessible(true))
        );
    }

    #[test]
    fn secure_enclave_commands_pass_the_prompt() {
        let keychain = InMemoryKeychain::new();
        let target = TargetArgs {
            secure_enclave: true,
            ..TargetArgs::default()
        };
        let facade = facade(&target, &keychain);
        let set = StoreCommand::Set {
            key: "pin".into(),
            value: "1234".into(),
        };
        facade.execute(&set, Some("Save PIN")).expect("set");
        facade
            .execute(&StoreCommand::Get { key: "pin".into() }, Some("Show PIN"))
            .expect("get");
        assert_eq!(keychain.prompts(), vec![Some("Show PIN".to_string())]);
    }

    #[tokio::test]
    async fn handle_runs_against_memory_backend() {
        let target = TargetArgs {
            backend: Some(crate::config::Backend::Memory),
            ..TargetArgs::default()
        };
        handle(StoreCommand::Check, &target, &Config::default())
            .await
            .expect("memory backend is accessible");
    }
}
