//! Structured carrier-instruction builder. Renders a single `<Response>`
//! document; never hand-assembled by callers as a raw string, which is what
//! keeps the idempotence guarantee (§4.5) mechanical — the same `Document`
//! value always serializes to the same bytes.

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verb {
    Say { voice: String, lang: String, text: String },
    Play { url: String, loop_count: u32 },
    Gather { input: GatherInput, timeout_secs: u64, num_digits: Option<usize>, finish_on_key: char, action_url: String, nested: Vec<Verb> },
    Dial { caller_id: String, timeout_secs: u64, action_url: String, record: bool, number: String },
    Redirect { url: String },
    Connect { stream_url: String, parameters: Vec<(String, String)> },
    Hangup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherInput {
    Dtmf,
    Speech,
    Both,
}

impl GatherInput {
    fn as_attr(self) -> &'static str {
        match self {
            GatherInput::Dtmf => "dtmf",
            GatherInput::Speech => "speech",
            GatherInput::Both => "dtmf speech",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    verbs: Vec<Verb>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, verb: Verb) -> Self {
        self.verbs.push(verb);
        self
    }

    pub fn say(self, voice: &str, lang: &str, text: &str) -> Self {
        self.push(Verb::Say { voice: voice.to_string(), lang: lang.to_string(), text: text.to_string() })
    }

    pub fn play(self, url: &str, loop_count: u32) -> Self {
        self.push(Verb::Play { url: url.to_string(), loop_count })
    }

    pub fn hangup(self) -> Self {
        self.push(Verb::Hangup)
    }

    pub fn redirect(self, url: &str) -> Self {
        self.push(Verb::Redirect { url: url.to_string() })
    }

    pub fn connect_stream(self, stream_url: &str, parameters: Vec<(String, String)>) -> Self {
        self.push(Verb::Connect { stream_url: stream_url.to_string(), parameters })
    }

    /// `Dial` always carries an `action` so the transfer orchestrator can
    /// observe the outcome (§4.4 guarantee).
    pub fn dial(self, caller_id: &str, number: &str, timeout_secs: u64, action_url: &str, record: bool) -> Self {
        self.push(Verb::Dial {
            caller_id: caller_id.to_string(),
            timeout_secs,
            action_url: action_url.to_string(),
            record,
            number: number.to_string(),
        })
    }

    /// `Gather` always nests a prompt and is always followed by a fallback
    /// `Say` + `Redirect` to the same action URL so carrier-reported silence
    /// re-enters the same phase (§4.4 guarantee).
    pub fn gather_with_fallback(
        self,
        input: GatherInput,
        timeout_secs: u64,
        num_digits: Option<usize>,
        action_url: &str,
        prompt_verb: Verb,
        fallback_text: &str,
    ) -> Self {
        self.push(Verb::Gather {
            input,
            timeout_secs,
            num_digits,
            finish_on_key: '#',
            action_url: action_url.to_string(),
            nested: vec![prompt_verb],
        })
        .say("Polly.Olivia", "en-AU", fallback_text)
        .redirect(action_url)
    }

    pub fn render(&self) -> String {
        let mut out = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#);
        for verb in &self.verbs {
            render_verb(verb, &mut out);
        }
        out.push_str("</Response>");
        out
    }
}

fn render_verb(verb: &Verb, out: &mut String) {
    match verb {
        Verb::Say { voice, lang, text } => {
            out.push_str(&format!(r#"<Say voice="{}" language="{}">{}</Say>"#, escape(voice), escape(lang), escape(text)));
        }
        Verb::Play { url, loop_count } => {
            out.push_str(&format!(r#"<Play loop="{}">{}</Play>"#, loop_count, escape(url)));
        }
        Verb::Gather { input, timeout_secs, num_digits, finish_on_key, action_url, nested } => {
            out.push_str(&format!(
                r#"<Gather input="{}" timeout="{}" finishOnKey="{}" action="{}" method="POST""#,
                input.as_attr(),
                timeout_secs,
                finish_on_key,
                escape(action_url)
            ));
            if let Some(n) = num_digits {
                out.push_str(&format!(r#" numDigits="{n}""#));
            }
            out.push('>');
            for n in nested {
                render_verb(n, out);
            }
            out.push_str("</Gather>");
        }
        Verb::Dial { caller_id, timeout_secs, action_url, record, number } => {
            out.push_str(&format!(
                r#"<Dial callerId="{}" timeout="{}" action="{}" method="POST" record="{}"><Number>{}</Number></Dial>"#,
                escape(caller_id),
                timeout_secs,
                escape(action_url),
                if *record { "record-from-answer" } else { "do-not-record" },
                escape(number)
            ));
        }
        Verb::Redirect { url } => {
            out.push_str(&format!(r#"<Redirect method="POST">{}</Redirect>"#, escape(url)));
        }
        Verb::Connect { stream_url, parameters } => {
            out.push_str("<Connect><Stream url=\"");
            out.push_str(&escape(stream_url));
            out.push_str("\">");
            for (name, value) in parameters {
                out.push_str(&format!(r#"<Parameter name="{}" value="{}"/>"#, escape(name), escape(value)));
            }
            out.push_str("</Stream></Connect>");
        }
        Verb::Hangup => out.push_str("<Hangup/>"),
    }
}

/// Appends `call_sid` as a query parameter so every action URL threads the
/// call identity through (§4.4 guarantee).
pub fn action_url(base: &str, path: &str, call_sid: &str) -> String {
    format!("{base}{path}?CallSid={call_sid}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_single_root_response() {
        let doc = Document::new().say("Polly.Olivia", "en-AU", "hi").hangup();
        let xml = doc.render();
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#));
        assert!(xml.ends_with("</Response>"));
        assert_eq!(xml.matches("<Response>").count(), 1);
    }

    #[test]
    fn escapes_text_content() {
        let doc = Document::new().say("Polly.Olivia", "en-AU", "Tom & Jerry's \"show\"");
        let xml = doc.render();
        assert!(xml.contains("Tom &amp; Jerry&apos;s &quot;show&quot;"));
    }

    #[test]
    fn gather_always_has_fallback_say_and_redirect() {
        let doc = Document::new().gather_with_fallback(
            GatherInput::Dtmf,
            15,
            Some(4),
            "/voice/gather?CallSid=CA1",
            Verb::Say { voice: "Polly.Olivia".into(), lang: "en-AU".into(), text: "enter pin".into() },
            "no input received",
        );
        let xml = doc.render();
        assert!(xml.contains("<Gather"));
        assert!(xml.contains(r#"numDigits="4""#));
        assert!(xml.contains("no input received"));
        assert!(xml.contains(r#"<Redirect method="POST">/voice/gather?CallSid=CA1</Redirect>"#));
    }

    #[test]
    fn dial_always_carries_action() {
        let doc = Document::new().dial("+61490000000", "+61490550941", 30, "/transfer/status?CallSid=CA1", true);
        let xml = doc.render();
        assert!(xml.contains(r#"action="/transfer/status?CallSid=CA1""#));
    }

    #[test]
    fn identical_documents_render_byte_identical() {
        let a = Document::new().say("Polly.Olivia", "en-AU", "hello").render();
        let b = Document::new().say("Polly.Olivia", "en-AU", "hello").render();
        assert_eq!(a, b);
    }
}
