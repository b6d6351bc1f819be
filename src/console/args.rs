//! Command argument parsing.

/// Parsed console command line. Token zero is the command name itself, so
/// a command with one argument reports a count of two.
#[derive(Debug, Clone)]
pub struct CommandArgs {
    tokens: Vec<String>,
    /// Raw text after the command name, surrounding whitespace removed.
    rest: String,
}

impl CommandArgs {
    /// Splits a command line on whitespace, honoring double quotes.
    pub fn parse(line: &str) -> Self {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;

        for ch in line.trim().chars() {
            match ch {
                '"' => in_quotes = !in_quotes,
                c if c.is_whitespace() && !in_quotes => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            }
        }

        if !current.is_empty() {
            tokens.push(current);
        }

        let rest = match tokens.first() {
            Some(name) => line.trim()[name.len().min(line.trim().len())..]
                .trim()
                .trim_matches('"')
                .to_string(),
            None => String::new(),
        };

        Self { tokens, rest }
    }

    pub fn count(&self) -> usize {
        self.tokens.len()
    }

    pub fn at(&self, index: usize) -> &str {
        self.tokens.get(index).map(String::as_str).unwrap_or("")
    }

    /// Everything after the command name as one string. `startmovie my
    /// movie.mp4` yields `my movie.mp4`, spaces preserved.
    pub fn full_value(&self) -> &str {
        &self.rest
    }

    /// The entire line including the command name.
    pub fn full_args(&self) -> String {
        self.tokens.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_whitespace() {
        let args = CommandArgs::parse("startmovie out.mp4");
        assert_eq!(args.count(), 2);
        assert_eq!(args.at(0), "startmovie");
        assert_eq!(args.at(1), "out.mp4");
        assert_eq!(args.full_value(), "out.mp4");
    }

    #[test]
    fn quotes_keep_spaces_together() {
        let args = CommandArgs::parse("startmovie \"my movie.mp4\"");
        assert_eq!(args.count(), 2);
        assert_eq!(args.at(1), "my movie.mp4");
        assert_eq!(args.full_value(), "my movie.mp4");
    }

    #[test]
    fn missing_index_is_empty() {
        let args = CommandArgs::parse("endmovie");
        assert_eq!(args.count(), 1);
        assert_eq!(args.at(5), "");
        assert_eq!(args.full_value(), "");
    }
}
