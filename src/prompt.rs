//! Instructions sent to the image model alongside the photos.
//!
//! Each style has one prompt constant. `{subjects}` is replaced with a count-dependent
//! description of the photos; everything else is fixed.

use crate::error::SnowcardError;
use crate::style::Style;

/// Classic 1950s-1970s illustration.
pub const CLASSIC_PROMPT: &str = r#"Analyze {subjects} and identify ONLY the specific individuals shown.
Create a unified vintage Soviet New Year greeting card featuring ONLY these specific people.

CRITICAL INSTRUCTIONS:
1. NO EXTRA PEOPLE: Do not add any additional characters, background people, passersby, or generic faces. The final image must contain ONLY the individuals present in the input photos.
2. NO TEXT: Do not generate any text, letters, or writing in the image.
3. EXACT PORTRAIT: Create a harmonious composition focusing on the individuals identified.
4. PRESERVE LIKENESS: Maintain the exact facial features, expressions, and identities of every person. They must be easily recognizable.
5. STYLE: 1950s-1970s Soviet postcard illustration. Soft, warm, nostalgic, painterly aesthetic with a slight "paper" texture.
6. CLOTHING: Replace modern outfits with period-appropriate Soviet winter fashion (ushankas, fur coats, wool scarves).
7. SETTING: A magical, quiet snowy forest background with a single decorated New Year tree. Ensure the background is empty of any other humans.
8. COMPOSITION: Leave the top 20% clear (just sky or trees) for a text overlay."#;

/// 1960s twilight forest.
pub const TWILIGHT_PROMPT: &str = r#"Look at {subjects} carefully. Create a professional vintage Soviet 1960s-style New Year postcard illustration.

KEY CHARACTERS: Use ONLY the people from the provided photos. Do not add any other figures. They should be dressed in 1960s winter festive clothing (wool coats, scarves, classic hats). Preserve their facial features exactly.

BACKGROUND: A magical snow-covered evergreen forest under a soft twilight sky. A beautifully decorated festive tree in the background with vintage ornaments and a bright star. Warm glowing lights. No other humans anywhere in the scene.

ART STYLE: Painterly, nostalgic, rich textures like old paper or gouache. High detail but with a soft-focus vintage lens feel. No sharp digital edges.

COMPOSITION: Characters are in the foreground, joyful and celebrating. Keep the top 20% of the image clear for a title. No text, letters or writing in the image itself."#;

/// 1980s offset print.
pub const PAPER_GRAIN_PROMPT: &str = r#"Study {subjects} and identify ONLY the specific individuals shown.
Create a vintage Soviet 1980s offset-printed New Year postcard featuring ONLY these people.

RULES:
1. SUBJECTS: Only the individuals from the photos. No extra characters, crowds, passersby or faces.
2. NO TEXT: No text, letters, numbers or writing anywhere in the image.
3. LIKENESS: Keep every face exactly recognizable, with the same features and expressions.
4. STYLE: 1980s Soviet greeting card print with muted inks, slightly misregistered colours and soft matte paper.
5. CLOTHING: Period-appropriate 1980s Soviet winter clothes (knitted hats, sheepskin coats, mittens).
6. SETTING: A snowy pine forest with one decorated New Year tree and falling snow. No other humans.
7. COMPOSITION: Keep the top 20% of the frame plain sky or treetops for a title overlay."#;

/// The prompt template for a style.
pub fn prompt_template(style: Style) -> &'static str {
    match style {
        Style::Classic => CLASSIC_PROMPT,
        Style::Twilight => TWILIGHT_PROMPT,
        Style::PaperGrain => PAPER_GRAIN_PROMPT,
    }
}

fn subjects(image_count: usize) -> String {
    match image_count {
        1 => "this source photo (portray the person alone, exactly as they are)".to_string(),
        n => format!(
            "these {n} source photos (bring everyone from all {n} photos together into one group scene)"
        ),
    }
}

/// Builds the instruction for `image_count` photos.
pub fn build_prompt(style: Style, image_count: usize) -> Result<String, SnowcardError> {
    if image_count == 0 {
        return Err(SnowcardError::InvalidRequest(
            "at least one photo is needed to build a prompt".to_string(),
        ));
    }
    Ok(prompt_template(style).replace("{subjects}", &subjects(image_count)))
}
