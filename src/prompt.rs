//! Operator input for values that neither flags nor configuration supply.
//!
//! Each value resolves from the command line first, then the merged
//! configuration, then an interactive prompt. With prompting disabled a
//! value that has a default falls back to it and a required value is fatal.

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Input, Password};
use thiserror::Error;
use tracing::debug;

use crate::config::{AwsConfig, DEFAULT_REGION, non_blank};
use crate::tag::{InstallationTag, TagError};

/// Errors raised while collecting operator input.
#[derive(Debug, Error)]
pub enum PromptError {
    /// Raised when a required value is missing and prompting is disabled.
    #[error("{what} is required; pass it on the command line or set {env_var}")]
    Required {
        /// Human-readable name of the value.
        what: &'static str,
        /// Environment variable that would supply it.
        env_var: &'static str,
    },
    /// Raised when the terminal cannot be read.
    #[error("failed to read {what} from the terminal: {message}")]
    Terminal {
        /// Value being prompted for.
        what: String,
        /// Underlying error message.
        message: String,
    },
    /// Raised when the supplied tag is unusable.
    #[error(transparent)]
    Tag(#[from] TagError),
}

/// Source of operator answers.
pub trait Prompter {
    /// Whether questions can be asked at all.
    fn is_interactive(&self) -> bool;

    /// Asks for a line of text. An empty answer yields `default` when one is
    /// given.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::Terminal`] when input cannot be read.
    fn input(&self, prompt: &str, default: Option<&str>) -> Result<String, PromptError>;

    /// Asks for a value without echoing it.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::Terminal`] when input cannot be read.
    fn secret(&self, prompt: &str) -> Result<String, PromptError>;
}

/// Prompts on the controlling terminal.
pub struct TerminalPrompter {
    theme: ColorfulTheme,
}

impl TerminalPrompter {
    /// Creates a prompter using the coloured theme.
    #[must_use]
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

impl Default for TerminalPrompter {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompter for TerminalPrompter {
    fn is_interactive(&self) -> bool {
        true
    }

    fn input(&self, prompt: &str, default: Option<&str>) -> Result<String, PromptError> {
        let mut input = Input::<String>::with_theme(&self.theme).with_prompt(prompt);
        if let Some(value) = default {
            input = input.default(value.to_owned()).allow_empty(true);
        }
        input.interact_text().map_err(|err| PromptError::Terminal {
            what: prompt.to_owned(),
            message: err.to_string(),
        })
    }

    fn secret(&self, prompt: &str) -> Result<String, PromptError> {
        Password::with_theme(&self.theme)
            .with_prompt(prompt)
            .interact()
            .map_err(|err| PromptError::Terminal {
                what: prompt.to_owned(),
                message: err.to_string(),
            })
    }
}

/// Never asks; every question takes its default.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPrompt;

impl Prompter for NoPrompt {
    fn is_interactive(&self) -> bool {
        false
    }

    fn input(&self, prompt: &str, default: Option<&str>) -> Result<String, PromptError> {
        default.map(str::to_owned).ok_or_else(|| PromptError::Terminal {
            what: prompt.to_owned(),
            message: String::from("prompting is disabled"),
        })
    }

    fn secret(&self, prompt: &str) -> Result<String, PromptError> {
        Err(PromptError::Terminal {
            what: prompt.to_owned(),
            message: String::from("prompting is disabled"),
        })
    }
}

/// Resolves the installation tag from the flag, configuration, or a prompt.
///
/// # Errors
///
/// Returns [`PromptError::Required`] when no tag is available and prompting
/// is disabled, or [`PromptError::Tag`] when the tag is invalid.
pub fn resolve_tag(
    flag: Option<&str>,
    configured: Option<&str>,
    prompter: &dyn Prompter,
) -> Result<InstallationTag, PromptError> {
    if let Some(value) = non_blank(flag).or_else(|| non_blank(configured)) {
        return Ok(InstallationTag::new(value)?);
    }
    if !prompter.is_interactive() {
        return Err(PromptError::Required {
            what: "installation tag",
            env_var: "JUMPBOX_TAG",
        });
    }
    let answer = prompter.input("Installation tag", None)?;
    Ok(InstallationTag::new(&answer)?)
}

/// Resolves the region from the flag, configuration, or a prompt defaulting
/// to [`DEFAULT_REGION`].
///
/// # Errors
///
/// Returns [`PromptError::Terminal`] when the prompt fails.
pub fn resolve_region(
    flag: Option<&str>,
    configured: Option<&str>,
    prompter: &dyn Prompter,
) -> Result<String, PromptError> {
    if let Some(value) = non_blank(flag).or_else(|| non_blank(configured)) {
        return Ok(value.to_owned());
    }
    let answer = prompter.input("AWS region", Some(DEFAULT_REGION))?;
    Ok(non_blank(Some(answer.as_str()))
        .unwrap_or(DEFAULT_REGION)
        .to_owned())
}

/// Offers to collect access keys when neither keys nor a profile are set.
///
/// An empty access key leaves the ambient credential chain in charge.
///
/// # Errors
///
/// Returns [`PromptError::Terminal`] when the prompt fails.
pub fn resolve_credentials(aws: &mut AwsConfig, prompter: &dyn Prompter) -> Result<(), PromptError> {
    if !prompter.is_interactive() || aws.has_explicit_keys() || aws.effective_profile().is_some() {
        return Ok(());
    }
    let entered = prompter.input("AWS access key id (empty for default credentials)", Some(""))?;
    let Some(access_key) = non_blank(Some(entered.as_str())) else {
        debug!("using ambient AWS credentials");
        return Ok(());
    };
    let secret = prompter.secret("AWS secret access key")?;
    aws.access_key_id = Some(access_key.to_owned());
    aws.secret_access_key = Some(secret.trim().to_owned());
    Ok(())
}
