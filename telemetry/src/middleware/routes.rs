/// Route templates used to label requests when the router does not report a
/// matched path.
///
/// Parameters are written `{name}` or `:name`; `*`, `*rest` and `{*rest}`
/// match the remainder of the path. The first registered template that
/// matches wins.
#[derive(Debug, Clone, Default)]
pub struct RouteTemplates {
    templates: Vec<Template>,
}

#[derive(Debug, Clone)]
struct Template {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
    Rest,
}

impl RouteTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, template: impl Into<String>) -> Self {
        self.add(template);
        self
    }

    pub fn add(&mut self, template: impl Into<String>) {
        let raw = template.into();
        let segments = split(&raw).map(Segment::parse).collect();
        self.templates.push(Template { raw, segments });
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// The template `path` belongs to, as registered.
    pub fn resolve(&self, path: &str) -> Option<&str> {
        let parts: Vec<&str> = split(path).collect();
        self.templates
            .iter()
            .find(|template| template.matches(&parts))
            .map(|template| template.raw.as_str())
    }
}

impl<S: Into<String>> FromIterator<S> for RouteTemplates {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut routes = Self::new();
        for template in iter {
            routes.add(template);
        }
        routes
    }
}

impl Segment {
    fn parse(segment: &str) -> Self {
        if segment.starts_with('*') || segment.starts_with("{*") {
            Self::Rest
        } else if segment.starts_with(':') || (segment.starts_with('{') && segment.ends_with('}')) {
            Self::Param
        } else {
            Self::Literal(segment.to_string())
        }
    }
}

impl Template {
    fn matches(&self, parts: &[&str]) -> bool {
        let mut parts = parts.iter();
        for segment in &self.segments {
            match segment {
                Segment::Rest => return true,
                Segment::Param => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(literal) => {
                    if parts.next() != Some(&literal.as_str()) {
                        return false;
                    }
                }
            }
        }
        parts.next().is_none()
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}
