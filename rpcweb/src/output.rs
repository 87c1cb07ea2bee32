use crate::error::LaunchError;
use dialoguer::console::style;
use serde::Serialize;
use std::fmt::Display;

#[derive(Debug, Serialize)]
pub struct JsonResult<T: Serialize> {
    pub ok: bool,
    pub result: Option<T>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl<T: Serialize> JsonResult<T> {
    pub fn success(result: T) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
            error_code: None,
            hint: None,
        }
    }
}

pub fn error_payload(err: &LaunchError) -> JsonResult<serde_json::Value> {
    JsonResult {
        ok: false,
        result: None,
        error: Some(err.to_string()),
        error_code: Some(err.code()),
        hint: err.hint(),
    }
}

pub fn print_json<T: Serialize>(payload: &T) -> Result<(), LaunchError> {
    let text = serde_json::to_string_pretty(payload)?;
    println!("{}", text);
    Ok(())
}

pub fn output(json: bool, payload: serde_json::Value) -> Result<(), LaunchError> {
    if json {
        print_json(&JsonResult::success(payload))
    } else {
        println!("{}", serde_json::to_string_pretty(&payload)?);
        Ok(())
    }
}

pub fn report_error(json: bool, err: &LaunchError) {
    if json {
        if print_json(&error_payload(err)).is_ok() {
            return;
        }
    }
    eprintln!("{} {err}", style("error:").red().bold());
    if let Some(hint) = err.hint() {
        eprintln!("  {} {hint}", style("hint:").cyan());
    }
}

// Quiet in --json mode so stdout stays machine-readable.
#[derive(Debug, Clone, Copy)]
pub struct Console {
    quiet: bool,
}

impl Console {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    pub fn banner(&self, title: &str) {
        if self.quiet {
            return;
        }
        let rule = "=".repeat(60);
        println!("{rule}");
        println!("   {}", style(title).bold());
        println!("{rule}");
    }

    pub fn step(&self, title: &str) {
        if !self.quiet {
            println!("\n{} {}", style("==>").cyan().bold(), style(title).bold());
        }
    }

    pub fn detail(&self, label: &str, value: impl Display) {
        if !self.quiet {
            println!("    {}: {value}", style(label).dim());
        }
    }

    pub fn success(&self, message: impl Display) {
        if !self.quiet {
            println!("    {} {message}", style("ok").green().bold());
        }
    }

    pub fn warn(&self, message: impl Display) {
        eprintln!("{} {message}", style("warning:").yellow().bold());
    }
}
