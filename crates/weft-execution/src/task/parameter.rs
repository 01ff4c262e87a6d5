use std::fmt;

use serde::Serialize;

/// How a task accesses the data behind a parameter.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    In,
    Out,
    InOut,
    Concurrent,
    Commutative,
    InDelete,
}

impl Direction {
    pub fn reads(&self) -> bool {
        !matches!(self, Direction::Out)
    }

    pub fn writes(&self) -> bool {
        matches!(
            self,
            Direction::Out | Direction::InOut | Direction::Commutative
        )
    }
}

/// The application-level handle of a piece of data.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKey {
    File(String),
    Object(u64),
    Collection(String),
    Stream(String),
}

impl fmt::Display for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataKey::File(path) => write!(f, "file:{path}"),
            DataKey::Object(hash) => write!(f, "object:{hash}"),
            DataKey::Collection(id) => write!(f, "collection:{id}"),
            DataKey::Stream(id) => write!(f, "stream:{id}"),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ParameterKind {
    Basic,
    File,
    Object,
    Collection,
    Stream,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub name: String,
    pub direction: Direction,
    /// `None` for basic values that carry no data dependency.
    pub key: Option<DataKey>,
    /// The members of a collection parameter.
    pub elements: Vec<Parameter>,
}

impl Parameter {
    pub fn basic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::In,
            key: None,
            elements: vec![],
        }
    }

    pub fn file(name: impl Into<String>, path: impl Into<String>, direction: Direction) -> Self {
        Self {
            name: name.into(),
            direction,
            key: Some(DataKey::File(path.into())),
            elements: vec![],
        }
    }

    pub fn object(name: impl Into<String>, hash: u64, direction: Direction) -> Self {
        Self {
            name: name.into(),
            direction,
            key: Some(DataKey::Object(hash)),
            elements: vec![],
        }
    }

    pub fn stream(name: impl Into<String>, id: impl Into<String>, direction: Direction) -> Self {
        Self {
            name: name.into(),
            direction,
            key: Some(DataKey::Stream(id.into())),
            elements: vec![],
        }
    }

    pub fn collection(
        name: impl Into<String>,
        id: impl Into<String>,
        direction: Direction,
        elements: Vec<Parameter>,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            key: Some(DataKey::Collection(id.into())),
            elements,
        }
    }

    pub fn kind(&self) -> ParameterKind {
        match &self.key {
            None => ParameterKind::Basic,
            Some(DataKey::File(_)) => ParameterKind::File,
            Some(DataKey::Object(_)) => ParameterKind::Object,
            Some(DataKey::Collection(_)) => ParameterKind::Collection,
            Some(DataKey::Stream(_)) => ParameterKind::Stream,
        }
    }

    pub fn is_collection(&self) -> bool {
        self.kind() == ParameterKind::Collection
    }
}
