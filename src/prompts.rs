//! Prompts for image analysis.
//!
//! Every prompt the crate sends lives here so wording changes touch one file
//! and tests can inspect the exact text without a model. All builders are
//! pure: identical inputs give byte-identical prompts.

use crate::output::Stage;

/// Prompt for consolidated mode: one call, one JSON object.
pub const CONSOLIDATED_PROMPT: &str = r#"Analyze this image and return a single JSON object with exactly these five string fields:

{
  "caption": "One factual sentence describing the main subject and action. Concise and objective.",
  "summary": "A descriptive paragraph of 3-5 lines covering visual details (colors, composition, lighting, atmosphere) and spatial relationships. Descriptive but factual.",
  "objects": "A bulleted list of all visible objects, people, animals and entities, one per line starting with '- ', specific (e.g. 'red sports car' not 'car'), ordered by prominence (most prominent first), including background elements.",
  "mood": "2-3 sentences identifying the overall mood or atmosphere and the visual elements (lighting, colors, composition, expressions) that create it.",
  "story": "A creative short story of 5-10 lines inspired by the image, with sensory details and emotions, grounded in what is visible."
}

Rules:
- Every value must be a plain JSON string (use \n for line breaks).
- Return ONLY the JSON object. Do NOT add any text, explanation or markdown before or after it."#;

/// Stage 1: one-sentence factual caption.
pub fn caption_prompt() -> String {
    "Analyze this image and provide a single factual sentence that describes what you see.
Be concise and objective. Focus on the main subject and action.
Format: Return ONLY the caption sentence, nothing else."
        .to_string()
}

/// Stage 2: 3–5 line descriptive summary, anchored on the caption.
pub fn summary_prompt(caption: &str) -> String {
    format!(
        "Based on this image (Caption: \"{caption}\"), provide a detailed descriptive summary.

Requirements:
- Write 3-5 lines
- Include visual details (colors, composition, lighting, atmosphere)
- Describe spatial relationships and context
- Be descriptive but factual

Format: Return ONLY the summary text, nothing else."
    )
}

/// Stage 3: bulleted object list ordered by prominence.
pub fn objects_prompt() -> String {
    "Identify and list all visible objects, people, animals, and entities in this image.

Requirements:
- List each item on a new line with a bullet point (-)
- Include both prominent and background elements
- Be specific (e.g., \"red sports car\" not just \"car\")
- Order by prominence (most prominent first)

Format: Return ONLY the bulleted list, nothing else."
        .to_string()
}

/// Stage 4: mood analysis, given caption and summary.
pub fn mood_prompt(caption: &str, summary: &str) -> String {
    format!(
        "Analyze the emotional tone and mood of this image.

Context:
- Caption: \"{caption}\"
- Summary: \"{summary}\"

Requirements:
- Identify the overall mood/atmosphere (e.g., peaceful, energetic, melancholic, joyful)
- Explain what visual elements contribute to this mood
- Consider lighting, colors, composition, and subject expressions
- Write 2-3 sentences

Format: Return ONLY the mood analysis, nothing else."
    )
}

/// Stage 5: short story, given all four earlier outputs.
pub fn story_prompt(caption: &str, summary: &str, objects: &str, mood: &str) -> String {
    format!(
        "Write a creative short story inspired by this image.

Context:
- Caption: \"{caption}\"
- Summary: \"{summary}\"
- Objects present: {objects}
- Mood: \"{mood}\"

Requirements:
- Write 5-10 lines
- Create a narrative that fits the scene
- Include sensory details and emotions
- Stay grounded in what's visible in the image
- Make it engaging and imaginative

Format: Return ONLY the story text, nothing else."
    )
}

/// Outputs of the stages already run, fed into later prompts.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageContext<'a> {
    pub caption: &'a str,
    pub summary: &'a str,
    pub objects: &'a str,
    pub mood: &'a str,
}

/// Prompt for `stage` given what earlier stages produced.
pub fn stage_prompt(stage: Stage, ctx: &StageContext<'_>) -> String {
    match stage {
        Stage::Caption => caption_prompt(),
        Stage::Summary => summary_prompt(ctx.caption),
        Stage::Objects => objects_prompt(),
        Stage::Mood => mood_prompt(ctx.caption, ctx.summary),
        Stage::Story => story_prompt(ctx.caption, ctx.summary, ctx.objects, ctx.mood),
    }
}
