//! Rendering of list frames, as HTML for pages and plain text for the terminal.

use chrono::{DateTime, Utc};

use crate::models::{Frame, Topic};

pub const EMPTY_TITLE: &str = "No topics yet";
pub const EMPTY_HINT: &str = "Add the first entry via Admin.";

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#039;")
}

fn format_created(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

// ============================================================================
// HTML
// ============================================================================

fn render_topic_html(topic: &Topic, admin: bool) -> String {
    let controls = if admin {
        format!(
            r#"<button class="pill small" data-delete="{}">Delete</button>"#,
            html_escape(&topic.id)
        )
    } else {
        String::new()
    };

    format!(
        r#"<div class="topic">
    <h4>{title}</h4>
    <p>{text}</p>
    <div class="meta">{controls}</div>
</div>"#,
        title = html_escape(&topic.title),
        text = html_escape(&topic.text),
        controls = controls,
    )
}

/// Contents of the topics list element.
pub fn render_html(frame: &Frame) -> String {
    if frame.view.is_empty() {
        return format!(
            r#"<div class="topic"><h4>{}</h4><p>{}</p></div>"#,
            EMPTY_TITLE, EMPTY_HINT
        );
    }

    frame
        .view
        .topics()
        .iter()
        .map(|t| render_topic_html(t, frame.admin))
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Terminal
// ============================================================================

pub fn render_text(frame: &Frame) -> String {
    let mut out = String::new();
    let badge = if frame.admin { " [admin]" } else { "" };
    out.push_str(&format!("── Topics ({}){} ──\n", frame.view.len(), badge));

    if frame.view.is_empty() {
        out.push_str(&format!("  {}. {}\n", EMPTY_TITLE, EMPTY_HINT));
        return out;
    }

    for topic in frame.view.topics() {
        out.push_str(&format!(
            "  • {}  ({})\n",
            topic.title,
            format_created(topic.created_at)
        ));
        for line in topic.text.lines() {
            out.push_str(&format!("      {}\n", line));
        }
        if frame.admin {
            out.push_str(&format!("      id: {}\n", topic.id));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LiveView;
    use crate::store::Document;
    use serde_json::json;

    fn frame(admin: bool, topics: Vec<(&str, &str, &str, i64)>) -> Frame {
        let docs = topics
            .into_iter()
            .map(|(id, title, text, ts)| Document {
                id: id.to_string(),
                fields: json!({"title": title, "text": text, "createdAt": ts})
                    .as_object()
                    .unwrap()
                    .clone(),
            })
            .collect();
        Frame {
            revision: 1,
            view: LiveView::from_documents(docs),
            admin,
        }
    }

    #[test]
    fn test_empty_placeholder() {
        let html = render_html(&frame(false, vec![]));
        assert!(html.contains(EMPTY_TITLE));
        assert!(render_text(&frame(true, vec![])).contains(EMPTY_TITLE));
    }

    #[test]
    fn test_escapes_content() {
        let html = render_html(&frame(false, vec![("a", "<b>x</b>", "Tom & \"Jerry\"", 1)]));
        assert!(html.contains("&lt;b&gt;x&lt;/b&gt;"));
        assert!(html.contains("Tom &amp; &quot;Jerry&quot;"));
        assert!(!html.contains("<b>"));
    }

    #[test]
    fn test_delete_controls_only_for_admin() {
        let topics = vec![("id1", "t", "x", 1)];
        assert!(!render_html(&frame(false, topics.clone())).contains("Delete"));
        assert!(render_html(&frame(true, topics)).contains(r#"data-delete="id1""#));
    }

    #[test]
    fn test_html_order_follows_view() {
        let html = render_html(&frame(false, vec![("a", "old", "x", 1), ("b", "new", "y", 2)]));
        assert!(html.find("new").unwrap() < html.find("old").unwrap());
    }

    #[test]
    fn test_text_shows_ids_for_admin() {
        let topics = vec![("abc123", "Rally", "Sat\n20:00", 0)];
        let locked = render_text(&frame(false, topics.clone()));
        assert!(!locked.contains("abc123"));
        let admin = render_text(&frame(true, topics));
        assert!(admin.contains("id: abc123"));
        assert!(admin.contains("1970-01-01 00:00"));
        assert!(admin.contains("      20:00"));
    }

    #[test]
    fn test_html_escape_quotes() {
        assert_eq!(html_escape("'"), "&#039;");
    }
}
