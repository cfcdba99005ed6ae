//! Encoding of documents back to YAML.

use super::document::Document;
use super::v1alpha1::docs;
use crate::encoding::{join_documents, to_yaml};

/// Whether field descriptions are written as comments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommentsMode {
    /// Plain YAML.
    Disabled,
    /// Documented fields of the monolithic document carry a comment.
    Enabled,
}

impl Default for CommentsMode {
    fn default() -> Self {
        CommentsMode::Disabled
    }
}

/// Knobs for encoding.
#[derive(Clone, Debug, Default)]
pub struct EncoderOptions {
    /// Comment emission.
    pub comments: CommentsMode,
    /// When set, secrets are replaced with this placeholder before encoding.
    pub redact: Option<String>,
}

impl EncoderOptions {
    /// Options that emit documentation comments.
    pub fn with_comments() -> Self {
        EncoderOptions {
            comments: CommentsMode::Enabled,
            ..Default::default()
        }
    }
}

/// Encodes one document.
pub fn encode_document(document: &Document, opts: &EncoderOptions) -> Result<String, serde_yaml::Error> {
    let redacted;
    let document = match &opts.redact {
        Some(placeholder) => {
            redacted = document.redact(placeholder);
            &redacted
        }
        None => document,
    };

    let yaml = to_yaml(&document.to_value()?)?;
    match (opts.comments, document) {
        (CommentsMode::Enabled, Document::V1Alpha1(_)) => Ok(annotate(&yaml, docs::lookup)),
        _ => Ok(yaml),
    }
}

/// Encodes documents in order, separated by `---`.
pub fn encode_documents<'a, I>(documents: I, opts: &EncoderOptions) -> Result<String, serde_yaml::Error>
where
    I: IntoIterator<Item = &'a Document>,
{
    let encoded = documents
        .into_iter()
        .map(|d| encode_document(d, opts))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(join_documents(encoded))
}

/// Adds `lookup` descriptions to the keys of `yaml`. Keys with a scalar on
/// the same line get a trailing comment, section keys a comment above.
fn annotate(yaml: &str, lookup: fn(&str) -> Option<&'static str>) -> String {
    let mut out = String::with_capacity(yaml.len() * 2);
    let mut path: Vec<(usize, String)> = Vec::new();

    for line in yaml.lines() {
        let indent = line.len() - line.trim_start().len();
        let body = line.trim_start();

        while path.last().map(|(i, _)| *i >= indent).unwrap_or(false) {
            path.pop();
        }

        if body.starts_with("- ") || body == "-" {
            path.push((indent, "[]".to_string()));
            out.push_str(line);
            out.push('\n');
            continue;
        }

        let (key, rest) = match body.split_once(':') {
            Some((key, rest)) if is_plain_key(key) && (rest.is_empty() || rest.starts_with(' ')) => {
                (key, rest.trim())
            }
            _ => {
                out.push_str(line);
                out.push('\n');
                continue;
            }
        };

        path.push((indent, key.to_string()));
        let dotted = path.iter().map(|(_, k)| k.as_str()).collect::<Vec<_>>().join(".");

        match lookup(&dotted) {
            Some(doc) if rest.is_empty() || rest.starts_with('|') || rest.starts_with('>') => {
                out.push_str(&" ".repeat(indent));
                out.push_str("# ");
                out.push_str(doc);
                out.push('\n');
                out.push_str(line);
            }
            Some(doc) => {
                out.push_str(line);
                out.push_str(" # ");
                out.push_str(doc);
            }
            None => out.push_str(line),
        }
        out.push('\n');
    }

    out
}

fn is_plain_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' || c == '/')
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::v1alpha1::{Config, MachineConfig};

    fn lookup(path: &str) -> Option<&'static str> {
        match path {
            "version" => Some("The version."),
            "machine" => Some("The machine."),
            "machine.type" => Some("The type."),
            "machine.list.name" => Some("never used"),
            _ => None,
        }
    }

    #[test]
    fn comments_follow_scalars_and_precede_sections() {
        let yaml = "version: v1alpha1\nmachine:\n  type: worker\n  list:\n    - name: a\n";
        assert_eq!(
            "version: v1alpha1 # The version.\n# The machine.\nmachine:\n  type: worker # The type.\n  list:\n    - name: a\n",
            annotate(yaml, lookup)
        );
    }

    #[test]
    fn only_the_monolithic_document_is_commented() {
        let doc = Document::V1Alpha1(Box::new(Config {
            version: "v1alpha1".into(),
            machine: Some(MachineConfig {
                type_: "worker".into(),
                ..Default::default()
            }),
            ..Default::default()
        }));
        let plain = encode_document(&doc, &EncoderOptions::default()).unwrap();
        assert_eq!("version: v1alpha1\nmachine:\n  type: worker\n", plain);

        let commented = encode_document(&doc, &EncoderOptions::with_comments()).unwrap();
        assert!(commented.starts_with("version: v1alpha1 # Indicates the schema used to decode the contents.\n"));
        assert_eq!(plain, strip_comments(&commented));
    }

    fn strip_comments(yaml: &str) -> String {
        yaml.lines()
            .filter(|l| !l.trim_start().starts_with('#'))
            .map(|l| format!("{}\n", l.split(" # ").next().unwrap_or(l)))
            .collect()
    }
}
