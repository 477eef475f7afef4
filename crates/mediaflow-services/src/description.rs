//! Instruction sent to the vision model and strict parsing of its answer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Extraction instruction for image enrichment. The model must answer with bare JSON
/// of the shape `{"desc": string, "tags": [string]}`.
pub const IMAGE_EXTRACT_PROMPT: &str = r#"Extract the text from the image. Be very detailed and specific. Also have tags for the image.

### **Format the response in the following JSON format:**
```
{
  "desc": "a short description of the image under 200 words",
  "tags": ["tag1", "tag2", "tag3"]
}
```

### **Do not include any backticks or code blocks or any other formatting.**

- **correct json syntax**:

{
  "desc": "a short description of the image under 200 words",
  "tags": ["tag1", "tag2", "tag3"]
}

- **incorrect json syntax**:

```json
{
  "desc": "The text from the image",
  "tags": ["tag1", "tag2", "tag3"]
}
```
"#;

#[derive(Debug, Error)]
pub enum DescriptionError {
    #[error("model returned an empty response")]
    Empty,

    #[error("model output does not match {{desc, tags}}: {0}")]
    Schema(#[from] serde_json::Error),

    #[error("model output has an empty description")]
    EmptyDescription,
}

/// Description and tags extracted from an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StructuredDescription {
    pub desc: String,
    pub tags: Vec<String>,
}

impl StructuredDescription {
    /// Parse raw model output. Anything but a bare JSON object with a non-empty string
    /// `desc` and a string array `tags` is rejected, code fences included. Tags are
    /// trimmed and blank tags dropped.
    pub fn parse(raw: &str) -> Result<Self, DescriptionError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(DescriptionError::Empty);
        }

        let parsed: StructuredDescription = serde_json::from_str(raw)?;
        let desc = parsed.desc.trim().to_string();
        if desc.is_empty() {
            return Err(DescriptionError::EmptyDescription);
        }

        let tags = parsed
            .tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        Ok(Self { desc, tags })
    }
}
