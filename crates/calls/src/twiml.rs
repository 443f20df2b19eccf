//! TwiML documents served to the telephony provider.

use cr_domain::call::CallContext;

/// Bridge the call's media stream to `stream_url`, passing the call
/// context along as stream parameters.
pub fn connect_stream(stream_url: &str, ctx: &CallContext) -> String {
    let mut params = vec![("request_id", ctx.request_id.as_str()), ("to", ctx.to.as_str())];
    let optional = [
        ("script", &ctx.script),
        ("persona", &ctx.persona),
        ("context", &ctx.context),
        ("contact_name", &ctx.contact_name),
    ];
    for (name, value) in optional {
        if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
            params.push((name, v));
        }
    }

    let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Response><Connect>"#);
    xml.push_str(&format!(r#"<Stream url="{}">"#, escape(stream_url)));
    for (name, value) in params {
        xml.push_str(&format!(
            r#"<Parameter name="{}" value="{}"/>"#,
            escape(name),
            escape(value)
        ));
    }
    xml.push_str("</Stream></Connect></Response>");
    xml
}

/// Speak `message` and hang up.
pub fn say_and_hangup(message: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><Response><Say>{}</Say><Hangup/></Response>"#,
        escape(message)
    )
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
