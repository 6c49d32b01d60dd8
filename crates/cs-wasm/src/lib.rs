//! WebAssembly bindings for CleanSlate

use wasm_bindgen::prelude::*;

use cs_compiler::{parse_filter_list, Compiler, RuleKind};

/// Compile one raw selector. Returns `{ canonical, plain, descriptor }` or
/// an error when the selector does not compile.
#[wasm_bindgen]
pub fn compile_selector(raw: &str) -> Result<JsValue, JsValue> {
    let mut compiler = Compiler::new();
    let desc = compiler
        .compile(raw)
        .ok_or_else(|| JsValue::from_str(&format!("selector does not compile: {raw}")))?;

    let json = serde_json::to_string(&desc)
        .map_err(|e| JsValue::from_str(&format!("Failed to serialize descriptor: {e}")))?;

    let js_result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&js_result, &"canonical".into(), &JsValue::from_str(&desc.raw));
    let _ = js_sys::Reflect::set(&js_result, &"plain".into(), &JsValue::from(desc.is_plain_css()));
    let _ = js_sys::Reflect::set(&js_result, &"descriptor".into(), &JsValue::from_str(&json));
    Ok(js_result.into())
}

/// Canonical form of a selector, or `undefined` when it does not compile.
#[wasm_bindgen]
pub fn canonize(raw: &str) -> Option<String> {
    Compiler::new().compile(raw).map(|d| d.decompile())
}

/// Compile filter list texts into per-list stats and a JSON descriptor dump.
#[wasm_bindgen]
pub fn compile_filter_lists(list_texts: JsValue) -> Result<JsValue, JsValue> {
    let list_array = js_sys::Array::from(&list_texts);
    let list_count = list_array.length() as usize;

    if list_count == 0 {
        return Err(JsValue::from_str("No list texts provided"));
    }

    let mut compiler = Compiler::new();
    let mut all_rules = Vec::new();
    let list_stats = js_sys::Array::new_with_length(list_count as u32);

    for (idx, value) in list_array.iter().enumerate() {
        let text = value
            .as_string()
            .ok_or_else(|| JsValue::from_str("List text must be a string"))?;

        let rules = parse_filter_list(&text, &mut compiler);

        let stat = js_sys::Object::new();
        let _ = js_sys::Reflect::set(&stat, &"lines".into(), &JsValue::from(text.lines().count() as u32));
        let _ = js_sys::Reflect::set(&stat, &"rules".into(), &JsValue::from(rules.len() as u32));
        list_stats.set(idx as u32, stat.into());

        all_rules.extend(rules);
    }

    let mut hide = 0u32;
    let mut procedural = 0u32;
    let mut exceptions = 0u32;
    let mut descriptors = Vec::new();
    for rule in &all_rules {
        match &rule.kind {
            RuleKind::Hide(desc) => {
                hide += 1;
                if !desc.is_plain_css() {
                    procedural += 1;
                }
                descriptors.push(desc);
            }
            RuleKind::Exception(_) => exceptions += 1,
            RuleKind::Scriptlet(_) | RuleKind::Html(_) => {}
        }
    }

    let json = serde_json::to_string(&descriptors)
        .map_err(|e| JsValue::from_str(&format!("Failed to serialize descriptors: {e}")))?;

    let js_result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&js_result, &"descriptors".into(), &JsValue::from_str(&json));
    let _ = js_sys::Reflect::set(&js_result, &"hideRules".into(), &JsValue::from(hide));
    let _ = js_sys::Reflect::set(&js_result, &"proceduralRules".into(), &JsValue::from(procedural));
    let _ = js_sys::Reflect::set(&js_result, &"exceptionRules".into(), &JsValue::from(exceptions));
    let _ = js_sys::Reflect::set(&js_result, &"listStats".into(), &list_stats);

    Ok(js_result.into())
}

/// Selectors from a filter list text that apply to one hostname, split by
/// kind: `{ css: [...], procedural: [...json...], exceptions: [...] }`.
#[wasm_bindgen]
pub fn selectors_for_hostname(list_text: &str, hostname: &str) -> Result<JsValue, JsValue> {
    let mut compiler = Compiler::new();
    let rules = parse_filter_list(list_text, &mut compiler);

    let css = js_sys::Array::new();
    let procedural = js_sys::Array::new();
    let exceptions = js_sys::Array::new();

    for rule in rules.iter().filter(|r| r.applies_to(hostname)) {
        match &rule.kind {
            RuleKind::Hide(desc) if desc.is_plain_css() => {
                css.push(&JsValue::from_str(&desc.selector));
            }
            RuleKind::Hide(desc) => {
                let json = serde_json::to_string(desc)
                    .map_err(|e| JsValue::from_str(&format!("Failed to serialize descriptor: {e}")))?;
                procedural.push(&JsValue::from_str(&json));
            }
            RuleKind::Exception(raw) => {
                exceptions.push(&JsValue::from_str(raw));
            }
            RuleKind::Scriptlet(_) | RuleKind::Html(_) => {}
        }
    }

    let js_result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&js_result, &"css".into(), &css);
    let _ = js_sys::Reflect::set(&js_result, &"procedural".into(), &procedural);
    let _ = js_sys::Reflect::set(&js_result, &"exceptions".into(), &exceptions);
    Ok(js_result.into())
}
