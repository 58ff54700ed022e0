use anyhow::Result;
use headless_chrome::Tab;
use std::sync::Arc;

use crate::types::MouseButton;

/// Scroll the page itself rather than dispatching a wheel event, so pages
/// that ignore synthetic wheel input still move.
pub fn scroll_by(tab: &Arc<Tab>, dx: f64, dy: f64) -> Result<()> {
    tab.evaluate(&scroll_script(dx, dy), false)?;
    Ok(())
}

/// Dispatch a mouse click with a non-primary button on the element under
/// (x, y). The primary button goes through the input domain instead.
pub fn click_with_button(tab: &Arc<Tab>, x: f64, y: f64, button: MouseButton) -> Result<()> {
    tab.evaluate(&button_click_script(x, y, button), false)?;
    Ok(())
}

/// Current page URL as reported by the page itself.
pub fn get_current_url(tab: &Arc<Tab>) -> Result<String> {
    let result = tab.evaluate("window.location.href", false)?;
    Ok(result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| tab.get_url()))
}

fn scroll_script(dx: f64, dy: f64) -> String {
    format!("window.scrollBy({dx}, {dy})")
}

fn button_click_script(x: f64, y: f64, button: MouseButton) -> String {
    let index = button.dom_index();
    let mut events = vec!["mousedown", "mouseup"];
    if button == MouseButton::Right {
        events.push("contextmenu");
    } else {
        events.push("auxclick");
    }
    let events = events
        .iter()
        .map(|e| format!("'{e}'"))
        .collect::<Vec<_>>()
        .join(",");

    format!(
        r#"
(() => {{
  const el = document.elementFromPoint({x}, {y});
  if (!el) return false;
  for (const type of [{events}]) {{
    el.dispatchEvent(new MouseEvent(type, {{
      bubbles: true, cancelable: true, view: window,
      clientX: {x}, clientY: {y}, button: {index}
    }}));
  }}
  return true;
}})()
"#
    )
}
