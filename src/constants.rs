//! Prompt fragments shared by the role actors.

pub const DECOMPOSITION_INSTRUCTIONS: &str = "Your primary goal is to break this request down into initial, high-level tasks for the appropriate roles, considering whether it is a single-page or multi-page website.

Instructions:
1. Identify whether the request implies a single page or several pages (e.g. an about page or a contact section).
2. Use only the standard roles: \"Marketer\" (research), \"ProductManager\" (specifications) and \"Coder\" (implementation).
3. Give each role exactly one concise task. For multi-page sites, name every page in the ProductManager task.
4. Base tasks only on the user request.
5. If the request is too ambiguous to plan at all, ask ONE short question instead.

Output ONLY a single valid JSON object, either
{\"tasks\": [{\"role\": \"Marketer\", \"description\": \"...\"}, {\"role\": \"ProductManager\", \"description\": \"...\"}, {\"role\": \"Coder\", \"description\": \"...\"}]}
or
{\"clarification\": \"<your question>\"}
Do not include explanations or any text outside the JSON.";

pub const MARKETING_REPORT_OUTLINE: &str = "Write a concise market analysis in Markdown with these sections:
## Target Audience
## Competitor Landscape
## Key Messages
## Recommended Tone and Visual Style
Keep it practical: the product manager will turn it into page specifications.";

pub const SPECIFICATION_OUTLINE: &str = "Write the website specifications in Markdown.
For EVERY page use a heading of the exact form `## <Page Name> Specifications` (for example `## Homepage Specifications`, `## About Specifications`).
Under each page heading list: sections with their ids and classes, content to show, colors and typography, and any interactive behavior.
Only describe pages the request asks for.";

pub const HTML_RULES: &str = "Respond ONLY with the raw HTML code for the requested structure. Do NOT include any CSS, JavaScript, <style>, <script>, <!DOCTYPE>, <html>, <head> or <body> tags. Start directly with the first structural element.";

pub const CSS_RULES: &str = "Respond ONLY with raw CSS. Target the ids and classes used in the HTML structure above. Do not use Markdown fences or explanations.";

pub const JS_RULES: &str = "Respond ONLY with raw JavaScript. Wait for DOMContentLoaded, select elements by the ids and classes used in the HTML structure above and guard against missing elements. Do not use Markdown fences or explanations.";

pub const REVIEW_CHECKLIST: &str = "Conduct a comprehensive review checking for:
1. Structural completeness: all tags present and closed, a full document (DOCTYPE, html, head, body), no truncated sections.
2. Specification compliance: every specified section, component and feature is implemented.
3. Functionality: the script would work and handles missing elements.
4. Best practices: semantic HTML, responsive layout, accessibility.";

pub const VERDICT_FORMAT: &str = "Your response MUST be in this exact JSON format:
{\"requires_fix\": boolean, \"feedback\": \"Detailed explanation of the issues found, or confirmation that the code meets all requirements\"}
Set \"requires_fix\" to true if the code is incomplete, misses required features, or contains bugs.";

/// Feedback phrases that force a fix whatever the verdict says.
pub const INCOMPLETE_MARKERS: &[&str] = &[
    "incomplete",
    "cut off",
    "truncated",
    "missing closing tag",
    "abrupt",
];

pub const NO_MARKETING_REPORT: &str = "Marketing report not available.";
pub const NO_SPECIFICATIONS: &str = "Specifications not provided.";
