use std::fmt;

/// A declarative name such as `"Pixels Chunk Offset"`, kept as words so
/// every backend can pick its own casing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(String);

impl Name {
    pub fn new(name: &str) -> Self {
        // collapse runs of spaces, the configs are hand written
        Self(name.split_whitespace().collect::<Vec<_>>().join(" "))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.0.split(' ').filter(|word| !word.is_empty())
    }

    pub fn space(&self) -> &str {
        &self.0
    }

    /// `get_spitfp_error_count`
    pub fn under(&self) -> String {
        snake_case(&self.0)
    }

    /// `GetSPITFPErrorCount`
    pub fn camel(&self) -> String {
        camel_case(&self.0)
    }

    /// `getSPITFPErrorCount`
    pub fn headless(&self) -> String {
        let mut words = self.words();
        let mut output = String::new();
        if let Some(first) = words.next() {
            output.push_str(&first.to_lowercase());
        }
        for word in words {
            output.push_str(&camel_case(word));
        }
        output
    }

    /// `GET_SPITFP_ERROR_COUNT`
    pub fn upper(&self) -> String {
        snake_case(&self.0).to_uppercase()
    }

    /// Appends words, `"Pixels"` + `"Chunk Data"` is `"Pixels Chunk Data"`.
    pub fn join(&self, suffix: &str) -> Self {
        Self::new(&format!("{} {}", self.0, suffix))
    }

    /// Removes trailing words, returns `None` if they don't match.
    pub fn strip_suffix(&self, suffix: &str) -> Option<Self> {
        let suffix = Name::new(suffix);
        let stripped = self.0.strip_suffix(suffix.space())?;
        // must end on a word boundary and keep at least one word
        let stripped = stripped.strip_suffix(' ')?;
        Some(Self::new(stripped))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

pub fn snake_case(name: &str) -> String {
    name.split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}

pub fn camel_case(name: &str) -> String {
    let mut output = String::new();
    for word in name
        .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|word| !word.is_empty())
    {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            output.extend(first.to_uppercase());
        }
        // the rest is kept as is, `LED` stays `LED`
        output.extend(chars);
    }
    output
}
