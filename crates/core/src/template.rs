//! Group-name and destination-path templates.
//!
//! Templates are plain strings with `{name}` placeholders. The set of
//! accepted placeholders is fixed per template kind and checked when the
//! template is parsed, so rendering never fails on an unknown name.

use once_cell::sync::Lazy;
use regex_lite::{Captures, Regex};
use thiserror::Error;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([^{}]*)\}").unwrap());

const GROUP_PLACEHOLDERS: &[&str] = &["facility"];

const DESTINATION_PLACEHOLDERS: &[&str] = &[
    "dataset_folder",
    "source_folder",
    "pid",
    "pid_short",
    "pid_prefix",
    "pid_encoded",
    "username",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unknown placeholder '{{{0}}}'")]
    UnknownPlaceholder(String),

    #[error("unbalanced braces in '{0}'")]
    Unbalanced(String),

    #[error("template rendered to an empty string")]
    EmptyResult,
}

#[derive(Debug, Clone)]
struct Template {
    source: String,
}

impl Template {
    fn parse(source: &str, allowed: &[&str]) -> Result<Self, TemplateError> {
        for caps in PLACEHOLDER.captures_iter(source) {
            let name = &caps[1];
            if !allowed.contains(&name) {
                return Err(TemplateError::UnknownPlaceholder(name.to_string()));
            }
        }

        let literal = PLACEHOLDER.replace_all(source, "");
        if literal.contains('{') || literal.contains('}') {
            return Err(TemplateError::Unbalanced(source.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
        })
    }

    fn render<'a>(&self, lookup: impl Fn(&str) -> &'a str) -> String {
        PLACEHOLDER
            .replace_all(&self.source, |caps: &Captures| lookup(&caps[1]).to_string())
            .into_owned()
    }
}

/// Template for the access group required on a facility (`{facility}`).
#[derive(Debug, Clone)]
pub struct GroupTemplate(Template);

impl GroupTemplate {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        Template::parse(source, GROUP_PLACEHOLDERS).map(Self)
    }

    pub fn render(&self, facility: &str) -> String {
        self.0.render(|_| facility)
    }
}

/// Values available to a destination-path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationParams {
    /// Last path element of the dataset's source folder
    pub dataset_folder: String,
    pub source_folder: String,
    pub pid: String,
    /// Last path element of the pid (`20.500/abc` -> `abc`)
    pub pid_short: String,
    /// Everything before the last path element of the pid (`20.500/abc` -> `20.500`)
    pub pid_prefix: String,
    /// Percent-encoded pid, safe to use as a single path element
    pub pid_encoded: String,
    pub username: String,
}

impl DestinationParams {
    pub fn new(pid: &str, source_folder: &str, username: &str) -> Self {
        Self {
            dataset_folder: base_name(source_folder),
            source_folder: source_folder.to_string(),
            pid: pid.to_string(),
            pid_short: base_name(pid),
            pid_prefix: dir_name(pid),
            pid_encoded: urlencoding::encode(pid).into_owned(),
            username: username.to_string(),
        }
    }

    fn get(&self, name: &str) -> &str {
        match name {
            "dataset_folder" => &self.dataset_folder,
            "source_folder" => &self.source_folder,
            "pid" => &self.pid,
            "pid_short" => &self.pid_short,
            "pid_prefix" => &self.pid_prefix,
            "pid_encoded" => &self.pid_encoded,
            "username" => &self.username,
            _ => "",
        }
    }
}

/// Template for the destination path of a transfer.
#[derive(Debug, Clone)]
pub struct DestinationTemplate(Template);

impl DestinationTemplate {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        Template::parse(source, DESTINATION_PLACEHOLDERS).map(Self)
    }

    pub fn render(&self, params: &DestinationParams) -> Result<String, TemplateError> {
        let rendered = self.0.render(|name| params.get(name));
        if rendered.trim().is_empty() {
            return Err(TemplateError::EmptyResult);
        }
        Ok(rendered)
    }
}

/// Last element of a slash-separated path; `.` for an empty path.
fn base_name(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return if path.is_empty() { ".".to_string() } else { "/".to_string() };
    }
    match trimmed.rsplit_once('/') {
        Some((_, last)) => last.to_string(),
        None => trimmed.to_string(),
    }
}

/// Everything but the last element of a slash-separated path; `.` when
/// there is no directory part.
fn dir_name(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", _)) => "/".to_string(),
        Some((dir, _)) => dir.trim_end_matches('/').to_string(),
        None if path.starts_with('/') => "/".to_string(),
        None => ".".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_template_renders_facility() {
        let template = GroupTemplate::parse("{facility}-transfer-users").unwrap();
        assert_eq!(template.render("PSI"), "PSI-transfer-users");
    }

    #[test]
    fn test_group_template_rejects_destination_placeholders() {
        let err = GroupTemplate::parse("{username}").unwrap_err();
        assert_eq!(err, TemplateError::UnknownPlaceholder("username".to_string()));
    }

    #[test]
    fn test_unbalanced_braces_rejected() {
        assert!(matches!(
            GroupTemplate::parse("{facility"),
            Err(TemplateError::Unbalanced(_))
        ));
        assert!(matches!(
            DestinationTemplate::parse("/data/pid}"),
            Err(TemplateError::Unbalanced(_))
        ));
    }

    #[test]
    fn test_destination_params_from_pid_and_folder() {
        let params = DestinationParams::new("20.500.11935/abc-123", "/raw/2024/run_7/", "jdoe");
        assert_eq!(params.dataset_folder, "run_7");
        assert_eq!(params.pid_short, "abc-123");
        assert_eq!(params.pid_prefix, "20.500.11935");
        assert_eq!(params.pid_encoded, "20.500.11935%2Fabc-123");
        assert_eq!(params.username, "jdoe");
    }

    #[test]
    fn test_destination_params_pid_without_prefix() {
        let params = DestinationParams::new("abc", "run", "jdoe");
        assert_eq!(params.pid_short, "abc");
        assert_eq!(params.pid_prefix, ".");
        assert_eq!(params.dataset_folder, "run");
    }

    #[test]
    fn test_destination_template_render() {
        let template =
            DestinationTemplate::parse("/archive/{username}/{pid_short}/{dataset_folder}").unwrap();
        let params = DestinationParams::new("20.500/xyz", "/raw/sample_1", "jdoe");
        assert_eq!(
            template.render(&params).unwrap(),
            "/archive/jdoe/xyz/sample_1"
        );
    }

    #[test]
    fn test_destination_template_empty_result() {
        let template = DestinationTemplate::parse("{username}").unwrap();
        let params = DestinationParams::new("pid", "/raw", "");
        assert_eq!(template.render(&params), Err(TemplateError::EmptyResult));
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(base_name(""), ".");
        assert_eq!(base_name("/"), "/");
        assert_eq!(base_name("a/b/"), "b");
        assert_eq!(dir_name("/a"), "/");
        assert_eq!(dir_name("a/b/c"), "a/b");
    }
}
