use std::fmt;
use std::str::FromStr;

use crate::config::{
    ANALYSIS_REQUIREMENTS, CABINETS_TEMPLATE, DECK_TEMPLATE, FIREPLACE_TEMPLATE,
    GENERATION_SUFFIX, ROOM_TEMPLATE,
};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceType {
    Cabinets,
    Fireplace,
    Deck,
    Room,
}

impl SurfaceType {
    pub const ALL: [SurfaceType; 4] = [
        SurfaceType::Cabinets,
        SurfaceType::Fireplace,
        SurfaceType::Deck,
        SurfaceType::Room,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SurfaceType::Cabinets => "cabinets",
            SurfaceType::Fireplace => "fireplace",
            SurfaceType::Deck => "deck",
            SurfaceType::Room => "room",
        }
    }

    pub fn template(self) -> &'static str {
        match self {
            SurfaceType::Cabinets => CABINETS_TEMPLATE,
            SurfaceType::Fireplace => FIREPLACE_TEMPLATE,
            SurfaceType::Deck => DECK_TEMPLATE,
            SurfaceType::Room => ROOM_TEMPLATE,
        }
    }
}

impl fmt::Display for SurfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SurfaceType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        SurfaceType::ALL
            .into_iter()
            .find(|surface| surface.as_str() == value)
            .ok_or_else(|| AppError::InvalidSurfaceType(value.to_string()))
    }
}

/// Custom directions after trimming; blank input counts as absent.
pub fn normalize_directions(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// Base template plus any user directions, which take priority.
pub fn build_instruction(surface: SurfaceType, custom_directions: Option<&str>) -> String {
    let base = surface.template();
    match custom_directions {
        Some(directions) => format!(
            "{base}\n\nUSER CUSTOM DIRECTIONS (PRIORITY - FOLLOW THESE SPECIFIC INSTRUCTIONS):\n{directions}\n\nIMPORTANT: The user's custom directions take priority. Apply their specific requests while still maintaining the same structure, layout, and perspective."
        ),
        None => base.to_string(),
    }
}

/// Stage-1 prompt. The dark/light judgement is only requested when the user
/// gave no directions of their own.
pub fn analysis_prompt(instruction: &str, has_custom_directions: bool) -> String {
    let mut prompt = String::from("Analyze this image carefully.");
    if !has_custom_directions {
        prompt.push_str(" First, determine if the current finish is DARK or LIGHT.");
    }
    prompt.push_str("\n\n");
    prompt.push_str(ANALYSIS_REQUIREMENTS);
    prompt.push_str("\n\nONLY CHANGE - SURFACE REFINISHING:\n");
    prompt.push_str(&format!("- Apply this transformation: \"{instruction}\"\n"));
    if !has_custom_directions {
        prompt.push_str("- If current finish is DARK → change ONLY the surface color/finish to LIGHT (white, cream, light gray)\n");
        prompt.push_str("- If current finish is LIGHT → change ONLY the surface color/finish to DARK (espresso, charcoal, rich wood)\n");
    }
    prompt.push_str(
        "- Update ONLY the paint/stain color and finish texture on the specified surface\n\
         - Update hardware (handles, pulls) color/style if mentioned\n\
         - DO NOT change structure, shape, size, or position of anything\n\
         - DO NOT add or remove any elements\n\
         - DO NOT change the layout or composition\n\n\
         Create a concise transformation prompt (2-3 sentences) that:\n",
    );
    if has_custom_directions {
        prompt.push_str("1. Incorporates the user's specific custom directions\n");
    } else {
        prompt.push_str("1. Identifies whether current finish is dark or light\n");
    }
    prompt.push_str(
        "2. Specifies ONLY the surface color/finish change needed\n\
         3. Emphasizes that everything else must remain IDENTICAL\n\
         4. Makes it clear this is SURFACE REFINISHING ONLY\n\n\
         Return ONLY the transformation prompt, nothing else. Keep it concise (2-3 sentences max).",
    );
    prompt
}

/// Stage-2 prompt sent to every image model.
pub fn generation_prompt(transformation: &str, has_custom_directions: bool) -> String {
    let mut prompt = format!("Transform this image: {transformation}. {GENERATION_SUFFIX}");
    if has_custom_directions {
        prompt.push_str(" Follow the user's specific custom directions carefully.");
    }
    prompt
}
