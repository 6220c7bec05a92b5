use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::process::Command;
use crate::config::TranscodeConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncoderError {
    #[error("unterminated quote in encoder argument template: {0}")]
    UnterminatedQuote(String),
}

/// Encoder argument template, split into arguments before substitution.
///
/// Arguments are separated by whitespace; double quotes group text containing
/// spaces and `\"` inserts a literal quote. `{0}` and `{1}` inside any argument
/// are replaced by the input and output paths. No shell is involved, so a
/// substituted path is always exactly one argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgTemplate {
    args: Vec<String>,
}

impl ArgTemplate {
    pub fn parse(template: &str) -> Result<Self, EncoderError> {
        let mut args = Vec::new();
        let mut current = String::new();
        let mut in_token = false;
        let mut quoted = false;
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '\\' if chars.peek() == Some(&'"') => {
                    chars.next();
                    current.push('"');
                    in_token = true;
                }
                '"' => {
                    quoted = !quoted;
                    in_token = true;
                }
                c if c.is_whitespace() && !quoted => {
                    if in_token {
                        args.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                c => {
                    current.push(c);
                    in_token = true;
                }
            }
        }

        if quoted {
            return Err(EncoderError::UnterminatedQuote(template.to_string()));
        }
        if in_token {
            args.push(current);
        }
        Ok(Self { args })
    }

    /// Arguments with `{0}` = input and `{1}` = output substituted
    pub fn render(&self, input: &str, output: &str) -> Vec<String> {
        self.args.iter().map(|arg| fill(arg, input, output)).collect()
    }
}

fn fill(arg: &str, input: &str, output: &str) -> String {
    let mut filled = String::with_capacity(arg.len());
    let mut rest = arg;
    while let Some(pos) = rest.find('{') {
        filled.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("{0}") {
            filled.push_str(input);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{1}") {
            filled.push_str(output);
            rest = after;
        } else {
            filled.push('{');
            rest = &tail[1..];
        }
    }
    filled.push_str(rest);
    filled
}

/// Why a conversion did or did not produce a usable file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    Converted,
    /// The output path would overwrite the input
    SameAsInput,
    /// The encoder could not be started
    LaunchFailed(String),
    /// The encoder exited without creating the output
    MissingOutput,
    /// The output is too small compared to the input; it has been deleted
    Undersized { input_bytes: u64, output_bytes: u64 },
}

/// One input file run through the encoder
#[derive(Debug, Clone)]
pub struct Conversion {
    pub input: PathBuf,
    pub output: PathBuf,
    pub outcome: ConversionOutcome,
}

impl Conversion {
    pub fn is_success(&self) -> bool {
        self.outcome == ConversionOutcome::Converted
    }
}

/// Runs the configured external encoder and checks its output
#[derive(Debug, Clone)]
pub struct Encoder {
    program: PathBuf,
    template: ArgTemplate,
    output_type: String,
    min_size_ratio: f64,
}

impl Encoder {
    pub fn new(program: impl Into<PathBuf>, template: ArgTemplate, output_type: &str, min_size_ratio: f64) -> Self {
        Self {
            program: program.into(),
            template,
            output_type: output_type.trim_start_matches('.').to_string(),
            min_size_ratio,
        }
    }

    pub fn from_config(cfg: &TranscodeConfig) -> Result<Self> {
        let template = ArgTemplate::parse(&cfg.encoder_args)?;
        Ok(Self::new(&cfg.encoder_path, template, &cfg.output_type, cfg.min_size_ratio))
    }

    /// Input path with its final extension replaced by the output type
    pub fn output_path_for(&self, input: &Path) -> PathBuf {
        input.with_extension(&self.output_type)
    }

    /// Encode `input` and validate the result. Blocks until the encoder exits.
    pub async fn convert(&self, input: &Path) -> Result<Conversion> {
        let output = self.output_path_for(input);
        let mut conversion = Conversion {
            input: input.to_path_buf(),
            output: output.clone(),
            outcome: ConversionOutcome::Converted,
        };

        if output == input {
            warn!("Output path equals input path, refusing to convert: {}", input.display());
            conversion.outcome = ConversionOutcome::SameAsInput;
            return Ok(conversion);
        }

        let args = self.template.render(&input.to_string_lossy(), &output.to_string_lossy());
        info!("Encoder file: {}", self.program.display());
        info!("Encoder parameters: {:?}", args);

        let status = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if !status.success() => {
                warn!("Encoder exited with {} for {}", status, input.display());
            }
            Ok(_) => debug!("Encoder finished for {}", input.display()),
            Err(e) => {
                error!("Failed to launch encoder {}: {}", self.program.display(), e);
                conversion.outcome = ConversionOutcome::LaunchFailed(e.to_string());
                return Ok(conversion);
            }
        }

        if !output.exists() {
            error!("Failed to create output file: {}", output.display());
            conversion.outcome = ConversionOutcome::MissingOutput;
            return Ok(conversion);
        }

        let input_bytes = file_size(input)?;
        let output_bytes = file_size(&output)?;
        if (output_bytes as f64) < (input_bytes as f64) * self.min_size_ratio {
            error!(
                "Output file size is too small ({} of {} bytes), assuming transcode failed",
                output_bytes, input_bytes
            );
            delete_file(&output);
            conversion.outcome = ConversionOutcome::Undersized { input_bytes, output_bytes };
        }

        Ok(conversion)
    }
}

fn file_size(path: &Path) -> Result<u64> {
    Ok(fs::metadata(path)
        .with_context(|| format!("Failed to stat file: {}", path.display()))?
        .len())
}

/// Delete a file, reporting failure instead of returning an error.
/// Returns true if the file is gone afterwards.
pub fn delete_file(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Deleted {}", path.display());
            !path.exists()
        }
        Err(e) => {
            warn!("Failed to delete {}: {}", path.display(), e);
            false
        }
    }
}
