//! Sketch-to-code generation.
//!
//! One model call per request: the sketch image plus a prompt that embeds the
//! caller's style hints, palette, and a fixed set of interpretation rules.
//! The first fenced code block of the response is the component; its comments
//! and blank lines are stripped before it leaves this module.

pub mod extract;

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::GenerateError;
use crate::llm::anthropic::split_image_payload;
use crate::llm::{CodeModel, PromptPart};

pub use extract::{extract_code_block, strip_comments};

/// Interpretation rules sent with every sketch.
pub const GENERATION_RULES: &str = r#"You are turning a hand-drawn UI sketch into a single React component written in TypeScript (TSX) styled with Tailwind CSS.

Interpreting the sketch:
- Rectangles with text inside are buttons; use <Button> from "@/components/ui/button".
- Long thin rectangles are text inputs; use <Input> from "@/components/ui/input", with a <Label> when text sits next to them.
- Large boxes that group other elements are cards; use <Card>, <CardHeader>, <CardTitle>, <CardContent> from "@/components/ui/card".
- Small squares next to text are checkboxes; circles next to text are radio options; a pill with a knob is a switch.
- Horizontal rows of labels at the top are navigation or tabs; stacked rows with columns are tables.
- Squiggly lines are body text; large or underlined words are headings.
- A box with an X through it is an image placeholder.

Layout:
- Preserve the relative position, alignment, and size of every element in the sketch.
- Keep rows as rows and columns as columns; use flex or grid to reproduce them.
- The layout must stay usable on narrow screens (responsive Tailwind classes).

Rules:
- Output exactly one fenced ```tsx code block containing the whole component and nothing else of substance.
- The file must `export default` the component.
- Only import from "react", "lucide-react", and "@/components/ui/*".
- Do not fetch data, use timers, access localStorage, or add routing.
- Do not write any comments in the code.
- Every piece of state must be initialized; every handler must be defined."#;

/// Five named colors applied to the generated UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColorPalette {
    pub primary: String,
    pub secondary: String,
    pub accent: String,
    pub background: String,
    pub text: String,
}

impl Default for ColorPalette {
    fn default() -> Self {
        Self {
            primary: "#2563eb".to_string(),
            secondary: "#64748b".to_string(),
            accent: "#f59e0b".to_string(),
            background: "#ffffff".to_string(),
            text: "#0f172a".to_string(),
        }
    }
}

impl ColorPalette {
    /// Apply `name=value` pairs separated by commas, e.g. `primary=#111,text=#eee`.
    pub fn with_overrides(mut self, spec: &str) -> Result<Self, String> {
        for pair in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("expected name=value, got '{}'", pair))?;
            let value = value.trim().to_string();
            match name.trim() {
                "primary" => self.primary = value,
                "secondary" => self.secondary = value,
                "accent" => self.accent = value,
                "background" => self.background = value,
                "text" => self.text = value,
                other => {
                    return Err(format!(
                        "unknown palette color '{}' (expected primary, secondary, accent, background, text)",
                        other
                    ));
                }
            }
        }
        Ok(self)
    }
}

/// Build the text part of the generation prompt.
pub fn build_prompt(style_guide: &str, custom_prompt: &str, palette: &ColorPalette) -> String {
    let mut prompt = String::from(GENERATION_RULES);

    prompt.push_str("\n\nColor palette (use these as Tailwind arbitrary values):\n");
    prompt.push_str(&format!("- primary: {}\n", palette.primary));
    prompt.push_str(&format!("- secondary: {}\n", palette.secondary));
    prompt.push_str(&format!("- accent: {}\n", palette.accent));
    prompt.push_str(&format!("- background: {}\n", palette.background));
    prompt.push_str(&format!("- text: {}\n", palette.text));

    if !style_guide.trim().is_empty() {
        prompt.push_str("\nStyle guide:\n");
        prompt.push_str(style_guide.trim());
        prompt.push('\n');
    }
    if !custom_prompt.trim().is_empty() {
        prompt.push_str("\nAdditional instructions from the user:\n");
        prompt.push_str(custom_prompt.trim());
        prompt.push('\n');
    }
    prompt
}

fn validate_image(image: &str) -> Result<(), GenerateError> {
    let (_, data) = split_image_payload(image).map_err(GenerateError::InvalidImage)?;
    BASE64
        .decode(data.as_bytes())
        .map_err(|e| GenerateError::InvalidImage(format!("payload is not valid base64: {}", e)))?;
    Ok(())
}

#[derive(Clone)]
pub struct CodeGenerator {
    model: Arc<dyn CodeModel>,
    temperature: f32,
}

impl CodeGenerator {
    pub fn new(model: Arc<dyn CodeModel>, temperature: f32) -> Self {
        Self { model, temperature }
    }

    /// Generate component source from a sketch. Calls the model exactly once.
    pub async fn generate(
        &self,
        image: &str,
        style_guide: &str,
        custom_prompt: &str,
        palette: &ColorPalette,
    ) -> Result<String, GenerateError> {
        validate_image(image)?;

        let parts = [
            PromptPart::Image(image.to_string()),
            PromptPart::Text(build_prompt(style_guide, custom_prompt, palette)),
        ];
        info!(temperature = self.temperature, "requesting code generation");
        let response = self.model.generate(&parts, self.temperature).await?;
        debug!(chars = response.len(), "model response received");

        let Some(code) = extract_code_block(&response) else {
            warn!(response = %crate::util::truncate_str(&response, 200), "no code block in model response");
            return Err(GenerateError::Extraction);
        };
        Ok(strip_comments(&code))
    }
}
