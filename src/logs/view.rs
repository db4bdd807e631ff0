/// Raw log text of one card plus the options that shape what is shown.
///
/// Everything visible is derived from `(raw, search, reversed)` on demand;
/// nothing is cached between renders.
#[derive(Debug, Clone, Default)]
pub struct LogViewModel {
    raw: String,
    search: String,
    reversed: bool,
}

impl LogViewModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_chunk(&mut self, text: &str) {
        self.raw.push_str(text);
    }

    pub fn replace_all(&mut self, text: impl Into<String>) {
        self.raw = text.into();
    }

    pub fn set_search_term(&mut self, term: impl Into<String>) {
        self.search = term.into();
    }

    pub fn set_reversed(&mut self, reversed: bool) {
        self.reversed = reversed;
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn search_term(&self) -> &str {
        &self.search
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    pub fn line_count(&self) -> usize {
        self.raw.split('\n').count()
    }

    /// Lines matching the search term, in buffer order.
    pub fn filtered_lines(&self) -> Vec<&str> {
        let term = self.search.trim().to_lowercase();
        let lines = self.raw.split('\n');
        if term.is_empty() {
            return lines.collect();
        }
        lines
            .filter(|line| line.to_lowercase().contains(&term))
            .collect()
    }

    /// Filtered text in buffer order; what copy and download export.
    pub fn filtered_text(&self) -> String {
        self.filtered_lines().join("\n")
    }

    pub fn render(&self) -> String {
        let mut lines = self.filtered_lines();
        if self.reversed {
            lines.reverse();
        }
        lines.join("\n")
    }
}
