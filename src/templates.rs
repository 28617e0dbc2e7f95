//! HTML pages.

use axum::response::Html;

use crate::session::Flash;

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; max-width: 40rem; margin: 2rem auto; padding: 0 1rem; }
.flash { padding: .75rem 1rem; border-radius: .5rem; margin-bottom: .5rem; }
.flash.success { background: #e6f4ea; color: #1e4620; }
.flash.error { background: #fdecea; color: #611a15; }
.flash.info { background: #e8f0fe; color: #174ea6; }
video, canvas { width: 100%; border-radius: .5rem; background: #000; }
form { display: grid; gap: .75rem; margin-top: 1rem; }
button { padding: .6rem; cursor: pointer; }
#email-status { font-size: .9rem; min-height: 1.2rem; }
"#;

const CAPTURE_SCRIPT: &str = r#"
const video = document.getElementById('camera');
const canvas = document.getElementById('snapshot');
const form = document.getElementById('face-form');
const email = document.getElementById('email');
const status = document.getElementById('email-status');

navigator.mediaDevices.getUserMedia({ video: { facingMode: 'user' } })
  .then((stream) => { video.srcObject = stream; })
  .catch(() => { status.textContent = 'Camera access is required to continue.'; });

form.addEventListener('submit', (event) => {
  canvas.width = video.videoWidth;
  canvas.height = video.videoHeight;
  canvas.getContext('2d').drawImage(video, 0, 0);
  document.getElementById('image_data').value = canvas.toDataURL('image/jpeg', 0.92);
  document.getElementById('mode').value = event.submitter.value;
});

email.addEventListener('change', async () => {
  const body = new URLSearchParams({ email: email.value });
  const response = await fetch('/check_email', { method: 'POST', body });
  if (!response.ok) { status.textContent = ''; return; }
  const { registered } = await response.json();
  status.textContent = registered
    ? 'This email is registered: log in with your face.'
    : 'New email: register your face first.';
});
"#;

/// Escape text for HTML element and attribute content.
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn flashes(flashes: &[Flash]) -> String {
    flashes
        .iter()
        .map(|flash| {
            format!(
                r#"<div class="flash {}">{}</div>"#,
                flash.category.as_str(),
                escape(&flash.message)
            )
        })
        .collect()
}

fn layout(title: &str, body: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{}</title>
<style>{STYLE}</style>
</head>
<body>
{body}
</body>
</html>"#,
        escape(title)
    ))
}

/// Capture page, with login and registration buttons.
pub fn index(name: &str, messages: &[Flash]) -> Html<String> {
    let body = format!(
        r#"<h1>{name}</h1>
{flashes}
<video id="camera" autoplay playsinline muted></video>
<canvas id="snapshot" hidden></canvas>
<form id="face-form" method="post" action="/submit">
  <input id="email" name="email" type="email" placeholder="you@example.com" required>
  <div id="email-status"></div>
  <input id="image_data" name="image_data" type="hidden">
  <input id="mode" name="mode" type="hidden">
  <button type="submit" value="login">Log in</button>
  <button type="submit" value="register">Register</button>
</form>
<script>{CAPTURE_SCRIPT}</script>"#,
        name = escape(name),
        flashes = flashes(messages),
    );

    layout(name, &body)
}

/// Page reserved to logged in users.
pub fn dashboard(name: &str, email: &str, messages: &[Flash]) -> Html<String> {
    let body = format!(
        r#"<h1>{name}</h1>
{flashes}
<p>Signed in as <strong>{email}</strong>.</p>
<p><a href="/logout">Log out</a></p>"#,
        name = escape(name),
        flashes = flashes(messages),
        email = escape(email),
    );

    layout(name, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Category;

    #[test]
    fn test_escape() {
        assert_eq!(
            escape(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#x27;Jerry&#x27;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_index_renders_flashes() {
        let Html(page) = index(
            "facegate",
            &[Flash {
                category: Category::Error,
                message: "Authentication error: <boom>".into(),
            }],
        );

        assert!(page.contains(r#"<div class="flash error">Authentication error: &lt;boom&gt;</div>"#));
        assert!(page.contains(r#"action="/submit""#));
    }

    #[test]
    fn test_dashboard_escapes_email() {
        let Html(page) = dashboard("facegate", "<script>@x.io", &[]);
        assert!(page.contains("&lt;script&gt;@x.io"));
        assert!(!page.contains("<script>@"));
    }
}
