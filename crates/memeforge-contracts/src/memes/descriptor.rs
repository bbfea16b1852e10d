use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_MEME_WIDTH: u32 = 476;
pub const DEFAULT_MEME_HEIGHT: u32 = 500;
pub const DEFAULT_CAPTION_WIDTH: u32 = 200;
pub const DEFAULT_CAPTION_FONT_SIZE: u32 = 18;

/// A text box the renderer wraps and draws a caption into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionSpec {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: Option<u32>,
    pub text: String,
    #[serde(rename = "fontSize")]
    pub font_size: u32,
}

impl CaptionSpec {
    /// Reads one caption entry of an upstream result, filling the fields the
    /// service omitted with the renderer defaults.
    pub fn from_value(value: &Value) -> Self {
        Self {
            x: value_as_i64(value.get("x")).map(clamp_i32).unwrap_or(0),
            y: value_as_i64(value.get("y")).map(clamp_i32).unwrap_or(0),
            width: value_as_u32(value.get("width")).unwrap_or(DEFAULT_CAPTION_WIDTH),
            height: value_as_u32(value.get("height")),
            text: value_as_text(value.get("text")).unwrap_or_default(),
            font_size: value_as_u32(value.get("fontSize").or_else(|| value.get("font_size")))
                .filter(|size| *size > 0)
                .unwrap_or(DEFAULT_CAPTION_FONT_SIZE),
        }
    }

    /// Full-width banner box used for the header/footer captions.
    pub fn banner(text: &str, y: i32, canvas_width: u32) -> Self {
        Self {
            x: 0,
            y,
            width: canvas_width,
            height: Some(30),
            text: text.to_string(),
            font_size: 20,
        }
    }
}

/// One meme as described by the AI service, prior to rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemeDescriptor {
    pub id: String,
    pub width: u32,
    pub height: u32,
    #[serde(rename = "image_name")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub captions: Vec<CaptionSpec>,
    #[serde(rename = "top_header_caption")]
    pub top_banner: Option<String>,
    #[serde(rename = "bottom_header_caption")]
    pub bottom_banner: Option<String>,
}

impl MemeDescriptor {
    /// Builds a descriptor from one entry of `response.results`.
    ///
    /// Numeric ids are coerced to strings; a missing or blank id is replaced
    /// by `fallback_id`.
    pub fn from_value(value: &Value, fallback_id: impl FnOnce() -> String) -> Self {
        let id = value_as_text(value.get("id"))
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(fallback_id);
        let captions = value
            .get("captions")
            .and_then(Value::as_array)
            .map(|rows| rows.iter().map(CaptionSpec::from_value).collect())
            .unwrap_or_default();

        Self {
            id,
            width: value_as_u32(value.get("width"))
                .filter(|width| *width > 0)
                .unwrap_or(DEFAULT_MEME_WIDTH),
            height: value_as_u32(value.get("height"))
                .filter(|height| *height > 0)
                .unwrap_or(DEFAULT_MEME_HEIGHT),
            image_url: non_empty_text(value.get("image_name")),
            captions,
            top_banner: non_empty_text(value.get("top_header_caption")),
            bottom_banner: non_empty_text(value.get("bottom_header_caption")),
        }
    }

    /// Base image URL, only when it points at an http(s) resource.
    pub fn remote_image_url(&self) -> Option<&str> {
        self.image_url
            .as_deref()
            .map(str::trim)
            .filter(|url| url.starts_with("http"))
    }

    /// Captions in draw order: descriptor captions, then header, then footer.
    pub fn layout_captions(&self) -> Vec<CaptionSpec> {
        let mut captions = self.captions.clone();
        if let Some(text) = &self.top_banner {
            captions.push(CaptionSpec::banner(text, 10, self.width));
        }
        if let Some(text) = &self.bottom_banner {
            let y = i64::from(self.height) - 40;
            captions.push(CaptionSpec::banner(text, clamp_i32(y), self.width));
        }
        captions
    }

    pub fn file_name(&self) -> String {
        let safe: String = self
            .id
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                    ch
                } else {
                    '_'
                }
            })
            .collect();
        format!("meme_{safe}.png")
    }
}

/// Text of a JSON scalar; numbers are rendered the way the service sent them.
pub fn value_as_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn non_empty_text(value: Option<&Value>) -> Option<String> {
    value_as_text(value).filter(|text| !text.trim().is_empty())
}

fn value_as_i64(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|raw| raw.round() as i64)),
        Value::String(raw) => {
            let trimmed = raw.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().map(|raw| raw.round() as i64))
        }
        _ => None,
    }
}

fn value_as_u32(value: Option<&Value>) -> Option<u32> {
    value_as_i64(value).and_then(|raw| u32::try_from(raw).ok())
}

fn clamp_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn numeric_id_is_coerced_to_string() {
        let descriptor = MemeDescriptor::from_value(&json!({"id": 4821}), || "unused".to_string());
        assert_eq!(descriptor.id, "4821");
        assert_eq!(descriptor.file_name(), "meme_4821.png");
    }

    #[test]
    fn missing_fields_fall_back_to_renderer_defaults() {
        let descriptor = MemeDescriptor::from_value(
            &json!({"captions": [{"text": "when the vet says"}], "image_name": ""}),
            || "abc123".to_string(),
        );
        assert_eq!(descriptor.id, "abc123");
        assert_eq!(descriptor.width, DEFAULT_MEME_WIDTH);
        assert_eq!(descriptor.height, DEFAULT_MEME_HEIGHT);
        assert_eq!(descriptor.image_url, None);
        assert_eq!(
            descriptor.captions,
            vec![CaptionSpec {
                x: 0,
                y: 0,
                width: DEFAULT_CAPTION_WIDTH,
                height: None,
                text: "when the vet says".to_string(),
                font_size: DEFAULT_CAPTION_FONT_SIZE,
            }]
        );
    }

    #[test]
    fn caption_coordinates_accept_floats_and_strings() {
        let caption = CaptionSpec::from_value(&json!({
            "x": 12.6, "y": "40", "width": 300.0, "height": 80, "text": "hi", "fontSize": 24
        }));
        assert_eq!(caption.x, 13);
        assert_eq!(caption.y, 40);
        assert_eq!(caption.width, 300);
        assert_eq!(caption.height, Some(80));
        assert_eq!(caption.font_size, 24);
    }

    #[test]
    fn only_http_urls_are_remote_images() {
        let mut descriptor = MemeDescriptor::from_value(
            &json!({"id": "a", "image_name": "templates/drake.png"}),
            String::new,
        );
        assert_eq!(descriptor.remote_image_url(), None);
        descriptor.image_url = Some("https://cdn.example.com/drake.png".to_string());
        assert_eq!(
            descriptor.remote_image_url(),
            Some("https://cdn.example.com/drake.png")
        );
    }

    #[test]
    fn banners_are_appended_after_captions() {
        let descriptor = MemeDescriptor::from_value(
            &json!({
                "id": "b",
                "width": 600,
                "height": 400,
                "captions": [{"text": "one"}],
                "top_header_caption": "top",
                "bottom_header_caption": "bottom",
            }),
            String::new,
        );
        let layout = descriptor.layout_captions();
        assert_eq!(layout.len(), 3);
        assert_eq!(layout[1], CaptionSpec::banner("top", 10, 600));
        assert_eq!(layout[2], CaptionSpec::banner("bottom", 360, 600));
    }

    #[test]
    fn file_name_sanitizes_path_separators() {
        let descriptor =
            MemeDescriptor::from_value(&json!({"id": "../etc/passwd"}), String::new);
        assert_eq!(descriptor.file_name(), "meme____etc_passwd.png");
    }

    #[test]
    fn serialized_descriptor_uses_upstream_field_names() -> anyhow::Result<()> {
        let descriptor = MemeDescriptor::from_value(
            &json!({"id": 9, "captions": [{"text": "x", "fontSize": 30}]}),
            String::new,
        );
        let value = serde_json::to_value(&descriptor)?;
        assert_eq!(value["id"], json!("9"));
        assert_eq!(value["captions"][0]["fontSize"], json!(30));
        assert!(value.get("image_name").is_some());
        assert!(value.get("top_header_caption").is_some());
        Ok(())
    }
}
