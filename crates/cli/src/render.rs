use std::io::{self, Write};

use pagechat_stream::{
    ClientError, ConversationStream, DocumentSource, ErrorKind, Message, Segment, StreamHandler,
    ToolInput, ToolStatus, citation_markers, highlight_segments, resolve_citation,
};

const HIGHLIGHT_ON: &str = "\x1b[1;33m";
const HIGHLIGHT_OFF: &str = "\x1b[0m";

/// Echoes a reply to the terminal while feeding it into the conversation.
///
/// Answer text goes to `out`; tool progress and errors go to `status`.
pub struct TerminalStream<'a, O, S> {
    inner: ConversationStream<'a>,
    out: O,
    status: S,
    echo: bool,
    /// Delta text already written to `out`.
    echoed: String,
}

impl<'a, O, S> TerminalStream<'a, O, S>
where
    O: Write,
    S: Write,
{
    pub fn new(inner: ConversationStream<'a>, out: O, status: S) -> Self {
        Self {
            inner,
            out,
            status,
            echo: true,
            echoed: String::new(),
        }
    }

    /// Keeps the conversation updates but prints nothing.
    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }

    fn print(&mut self, text: &str) {
        if !self.echo || text.is_empty() {
            return;
        }
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
    }

    fn status_line(&mut self, line: &str) {
        if self.echo {
            let _ = writeln!(self.status, "{line}");
        }
    }
}

impl<O, S> StreamHandler for TerminalStream<'_, O, S>
where
    O: Write,
    S: Write,
{
    fn on_tool_start(&mut self, call_id: &str, tool_name: &str, input: Option<&ToolInput>) {
        self.inner.on_tool_start(call_id, tool_name, input);
        self.status_line(&format!("  > {tool_name}"));
    }

    fn on_tool_end(&mut self, call_id: &str, output: Option<&str>) {
        self.inner.on_tool_end(call_id, output);
        let name = self
            .inner
            .in_progress()
            .and_then(|message| message.tool_call(call_id))
            .map(|call| call.name.clone());
        if let Some(name) = name {
            self.status_line(&format!("  < {name} done"));
        }
    }

    fn on_tool_error(&mut self, call_id: &str, error: &str) {
        self.inner.on_tool_error(call_id, error);
        self.status_line(&format!("  ! tool {call_id} failed: {error}"));
    }

    fn on_tool_result(&mut self, output: Option<&str>) {
        let open = self.inner.in_progress().and_then(|message| {
            message
                .tool_calls
                .iter()
                .rev()
                .find(|call| !call.status.is_terminal())
                .map(|call| call.name.clone())
        });
        self.inner.on_tool_result(output);
        if let Some(name) = open {
            self.status_line(&format!("  < {name} done"));
        }
    }

    fn on_content_delta(&mut self, delta: &str) {
        self.inner.on_content_delta(delta);
        self.print(delta);
        self.echoed.push_str(delta);
    }

    fn on_content_done(&mut self, content: &str) {
        self.inner.on_content_done(content);
        if self.echoed.is_empty() {
            self.print(content);
            self.echoed.push_str(content);
        } else if self.echoed != content {
            // The final text replaces what was streamed; show it in full.
            self.print("\n");
            self.status_line("  ~ final answer revised:");
            self.print(content);
            content.clone_into(&mut self.echoed);
        }
    }

    fn on_sources(&mut self, sources: &[DocumentSource]) {
        self.inner.on_sources(sources);
    }

    fn on_source(&mut self, source: &DocumentSource) {
        self.inner.on_source(source);
    }

    fn on_error(&mut self, error: &ClientError) {
        self.inner.on_error(error);
        let hint = match error.kind() {
            ErrorKind::Timeout => "the service took too long; try again",
            ErrorKind::Transport => "check the endpoint and your connection",
            ErrorKind::Remote => "the service could not answer this question",
        };
        self.status_line(&format!("\nerror: {error} ({hint})"));
    }

    fn on_complete(&mut self) {
        self.inner.on_complete();
        if !self.echoed.is_empty() {
            self.print("\n");
        }
    }
}

/// Writes one source's excerpt with highlight regions emphasized.
pub fn render_excerpt(source: &DocumentSource, color: bool) -> String {
    highlight_segments(&source.content, &source.highlights)
        .into_iter()
        .map(|Segment { text, highlighted }| match (highlighted, color) {
            (true, true) => format!("{HIGHLIGHT_ON}{text}{HIGHLIGHT_OFF}"),
            (true, false) => format!("**{text}**"),
            (false, _) => text.to_string(),
        })
        .collect()
}

/// Prints the tool summary and the sources cited by `message`.
pub fn render_reply_details(
    message: &Message,
    out: &mut impl Write,
    color: bool,
) -> io::Result<()> {
    if !message.tool_calls.is_empty() {
        writeln!(out, "\nSteps:")?;
        for call in &message.tool_calls {
            let status = match call.status {
                ToolStatus::Pending => "pending",
                ToolStatus::Running => "running",
                ToolStatus::Completed => "done",
                ToolStatus::Error => "failed",
            };
            match call.duration_millis() {
                Some(millis) => writeln!(out, "  - {} [{status}, {millis} ms]", call.name)?,
                None => writeln!(out, "  - {} [{status}]", call.name)?,
            }
        }
    }

    let cited = citation_markers(&message.content)
        .into_iter()
        .map(|marker| marker.number)
        .collect::<Vec<_>>();

    if message.sources.is_empty() {
        return Ok(());
    }

    writeln!(out, "\nSources:")?;
    for (position, source) in message.sources.iter().enumerate() {
        let number = source
            .citation_index
            .unwrap_or_else(|| u32::try_from(position + 1).unwrap_or(u32::MAX));
        let marker = if cited.contains(&number)
            && resolve_citation(&message.sources, number).is_some_and(|hit| hit.id == source.id)
        {
            "*"
        } else {
            " "
        };
        writeln!(
            out,
            "{marker}[{number}] {} / {} ({})",
            source.document_name,
            source.title(),
            source.page_label()
        )?;
        if let Some(summary) = source.summary() {
            writeln!(out, "      {summary}")?;
        }
        if !source.content.is_empty() {
            writeln!(out, "      {}", render_excerpt(source, color))?;
        }
    }

    Ok(())
}
