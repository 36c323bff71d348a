/// Producer command construction: resolve feed and format, then assemble the
/// argument vector for the selected product.
///
/// Everything here is pure apart from debug logging; spawning is the
/// supervisor's job.
use crate::product::{Product, ProductSpec, UnknownProduct};
use serde::Serialize;
use std::fmt;
use std::process::Stdio;
use thiserror::Error;

/// Format used when the caller does not ask for one.
pub const DEFAULT_FORMAT: &str = "JSON";

/// Invalid caller input detected while building a command.
///
/// None of these are retryable: running the same request again cannot fix it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error(transparent)]
    UnknownProduct(#[from] UnknownProduct),

    #[error("no producer binary configured for {product}")]
    ProductNotConfigured { product: Product },

    #[error("feed ({feed}) not available - available: {available:?}")]
    InvalidFeed { feed: String, available: Vec<String> },

    #[error("format ({format}) not available - available: {choices:?}")]
    InvalidFormat { format: String, choices: Vec<String> },

    #[error("raw command could not be tokenized: {raw}")]
    InvalidRawCommand { raw: String },
}

/// What the caller asked to stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRequest {
    pub product: String,
    /// Empty selects the product's default feed.
    pub feed: String,
    /// Empty selects [`DEFAULT_FORMAT`].
    pub format: String,
    pub credentials_file: String,
    pub credentials_section: String,
    /// Free-form arguments that replace structured construction entirely.
    pub raw_command: Option<String>,
    pub proxy: Option<String>,
}

impl Default for ProducerRequest {
    fn default() -> Self {
        Self {
            product: String::new(),
            feed: String::new(),
            format: String::new(),
            credentials_file: "~/.edgerc".to_string(),
            credentials_section: "default".to_string(),
            raw_command: None,
            proxy: None,
        }
    }
}

/// Identity attached to the producer's outbound requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgent {
    pub suite: String,
    pub version: String,
}

impl Default for UserAgent {
    fn default() -> Self {
        Self {
            suite: "ULS".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// A finished argument vector. `argv[0]` is the program to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProducerCommand {
    argv: Vec<String>,
}

impl ProducerCommand {
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }

    /// A `std::process::Command` with stdout and stderr piped and stdin closed.
    pub fn to_process(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new(self.program());
        cmd.args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl fmt::Display for ProducerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv.join(" "))
    }
}

/// Pick the feed to stream. Order of `available` matters: the first entry is
/// the default.
pub fn resolve_feed(requested: &str, available: &[String]) -> Result<String, CommandError> {
    if available.iter().any(|f| f == requested) {
        tracing::debug!(feed = requested, "selected feed");
        return Ok(requested.to_string());
    }
    if requested.is_empty() {
        if let Some(default) = available.first() {
            tracing::debug!(feed = %default, "using default feed");
            return Ok(default.clone());
        }
    }
    Err(CommandError::InvalidFeed {
        feed: requested.to_string(),
        available: available.to_vec(),
    })
}

/// Pick the output format. Matching is case-sensitive.
pub fn resolve_format(requested: &str, choices: &[String]) -> Result<String, CommandError> {
    if choices.iter().any(|c| c == requested) {
        return Ok(requested.to_string());
    }
    if requested.is_empty() {
        tracing::debug!(format = DEFAULT_FORMAT, "using default format");
        return Ok(DEFAULT_FORMAT.to_string());
    }
    Err(CommandError::InvalidFormat {
        format: requested.to_string(),
        choices: choices.to_vec(),
    })
}

pub fn proxy_flags(proxy: Option<&str>) -> Vec<String> {
    match proxy {
        Some(p) if !p.is_empty() => vec!["--proxy".to_string(), p.to_string()],
        _ => Vec::new(),
    }
}

/// Credential flags. Whether the file exists is the producer's concern.
pub fn auth_flags(credentials_file: &str, credentials_section: &str) -> Vec<String> {
    vec![
        "--edgerc".to_string(),
        credentials_file.to_string(),
        "--section".to_string(),
        credentials_section.to_string(),
    ]
}

pub fn user_agent_flags(user_agent: &UserAgent, product: Product, feed: &str) -> Vec<String> {
    vec![
        "--user-agent-prefix".to_string(),
        format!(
            "{}/{}_{}-{}",
            user_agent.suite, user_agent.version, product, feed
        ),
    ]
}

/// Assemble the argument vector for one product.
///
/// With a raw override only the user-agent tag is added; feed, format, proxy
/// and credentials are left entirely to the caller's arguments.
pub fn build_command(
    spec: &ProductSpec,
    request: &ProducerRequest,
    runtime: Option<&str>,
    format_choices: &[String],
    user_agent: &UserAgent,
) -> Result<ProducerCommand, CommandError> {
    let mut argv: Vec<String> = Vec::new();
    if let Some(rt) = runtime.filter(|rt| !rt.is_empty()) {
        argv.push(rt.to_string());
    }
    argv.push(spec.binary.to_string_lossy().into_owned());

    if let Some(raw) = request.raw_command.as_deref().filter(|r| !r.is_empty()) {
        let tokens = shlex::split(raw).ok_or_else(|| CommandError::InvalidRawCommand {
            raw: raw.to_string(),
        })?;
        argv.extend(user_agent_flags(user_agent, spec.product, &request.feed));
        argv.extend(tokens);
        return Ok(ProducerCommand { argv });
    }

    let feed = resolve_feed(&request.feed, &spec.feeds)?;
    let format = if spec.product.uses_format(&feed) {
        resolve_format(&request.format, format_choices)?
    } else {
        String::new()
    };

    argv.extend(proxy_flags(request.proxy.as_deref()));
    argv.extend(auth_flags(
        &request.credentials_file,
        &request.credentials_section,
    ));
    argv.extend(user_agent_flags(user_agent, spec.product, &feed));
    argv.extend(spec.product.subcommand(&feed, &format));
    Ok(ProducerCommand { argv })
}

/// Everything needed to turn a [`ProducerRequest`] into a [`ProducerCommand`].
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    pub runtime: Option<String>,
    pub format_choices: Vec<String>,
    pub user_agent: UserAgent,
    pub products: Vec<ProductSpec>,
}

impl CommandBuilder {
    pub fn spec_for(&self, product: Product) -> Option<&ProductSpec> {
        self.products.iter().find(|s| s.product == product)
    }

    pub fn build(&self, request: &ProducerRequest) -> Result<ProducerCommand, CommandError> {
        let product: Product = request.product.parse()?;
        tracing::debug!(%product, "selected product");
        let spec = self
            .spec_for(product)
            .ok_or(CommandError::ProductNotConfigured { product })?;
        build_command(
            spec,
            request,
            self.runtime.as_deref(),
            &self.format_choices,
            &self.user_agent,
        )
    }
}
