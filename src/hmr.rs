//! Dev-mode hot reload script injection

/// Script tag loading the dev server's HMR client
pub fn hmr_script(port: u16) -> String {
    format!(
        r#"<script type="module" src="http://localhost:{}/@vite/client"></script>"#,
        port
    )
}

/// Insert the HMR client before `</body>`, else before `</html>`, else append
pub fn inject_hmr_script(html: &str, port: u16) -> String {
    let script = hmr_script(port);
    let lower = html.to_ascii_lowercase();
    let position = lower.rfind("</body>").or_else(|| lower.rfind("</html>"));

    match position {
        Some(idx) => {
            let mut out = String::with_capacity(html.len() + script.len());
            out.push_str(&html[..idx]);
            out.push_str(&script);
            out.push_str(&html[idx..]);
            out
        }
        None => format!("{}{}", html, script),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_before_body() {
        let out = inject_hmr_script("<html><body><p>x</p></body></html>", 5173);
        assert!(out.ends_with(&format!("{}</body></html>", hmr_script(5173))));
    }

    #[test]
    fn test_inject_before_html_without_body() {
        let out = inject_hmr_script("<html><p>x</p></HTML>", 5173);
        assert_eq!(out, format!("<html><p>x</p>{}</HTML>", hmr_script(5173)));
    }

    #[test]
    fn test_append_for_fragment() {
        let out = inject_hmr_script("<div>x</div>", 4000);
        assert_eq!(out, format!("<div>x</div>{}", hmr_script(4000)));
    }
}
