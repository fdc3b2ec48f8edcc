//! Instruction text handed to the agent.

use crate::request::GenerationRequest;

const BASE_INSTRUCTIONS: &str = "\
You are an expert front-end developer who builds small, polished, self-contained web apps.

Output rules:
- Respond with exactly one complete HTML document and nothing else.
- Start with <!DOCTYPE html> and end with </html>. No markdown fences, no commentary.
- The document must contain <html>, <head>, and <body> sections.
- Put all CSS in <style> tags and all JavaScript in <script> tags inside the document.
- Do not load external scripts, stylesheets, fonts, or images; everything must work offline.
- Never emit a line consisting only of HTML_START or HTML_END, and never start a line
  with PROGRESS: or ERROR:.

Persistence:
- localStorage, sessionStorage, IndexedDB, and cookies are unavailable.
- Use the async key-value API `window.troveStorage` instead. It is injected for you:
    await troveStorage.get(key)        -> stored value or null
    await troveStorage.set(key, value) -> value may be any JSON-serializable data
    await troveStorage.delete(key)
    await troveStorage.clear()
    await troveStorage.getAll()        -> object of every stored key/value
- Load saved state on startup and save after every change the user would expect to keep.

Design:
- Responsive layout, clear typography, accessible controls, sensible empty states.";

const CREATE_INSTRUCTIONS: &str = "\
You have no tools. Write the app directly as your answer.";

const EDIT_INSTRUCTIONS: &str = "\
You are revising an existing app. Use the Read tool to load the current document before
changing anything. You cannot write files: return the complete updated document as your
answer, keeping existing behaviour and stored data keys unless asked to change them.
Drop any <script data-trove-storage-bridge> block from your answer; it is re-injected.";

/// System instructions for a run.
#[must_use]
pub fn system_prompt(editing: bool) -> String {
    let mode = if editing {
        EDIT_INSTRUCTIONS
    } else {
        CREATE_INSTRUCTIONS
    };
    format!("{BASE_INSTRUCTIONS}\n\n{mode}")
}

/// Task prompt for a run.
#[must_use]
pub fn task_prompt(request: &GenerationRequest) -> String {
    match request.edit_scope() {
        None => format!(
            "Create an app named \"{}\".\n\nRequirements:\n{}",
            request.name, request.prompt
        ),
        Some(scope) => format!(
            "Update the app named \"{}\". Its current document is at {}.\n\nRequested changes:\n{}",
            request.name,
            scope.target.display(),
            request.prompt
        ),
    }
}
