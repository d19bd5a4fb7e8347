/// Filter state of the host picker.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SearchState {
    #[default]
    Off,
    /// The user is typing a query.
    On { query: String },
    /// Typing finished; the query still filters the list.
    Applied { query: String },
}

impl SearchState {
    pub fn is_on(&self) -> bool {
        matches!(self, Self::On { .. })
    }

    pub fn is_off(&self) -> bool {
        matches!(self, Self::Off)
    }

    /// The active filter, empty when there is none.
    pub fn query(&self) -> &str {
        match self {
            Self::Off => "",
            Self::On { query } | Self::Applied { query } => query.as_str(),
        }
    }

    pub fn activate(&mut self) {
        *self = Self::On {
            query: String::new(),
        };
    }

    /// Stop editing. A non-empty query stays applied, an empty one turns the
    /// filter off.
    pub fn apply(&mut self) {
        match self {
            Self::On { query } if !query.is_empty() => {
                let q = std::mem::take(query);
                *self = Self::Applied { query: q };
            }
            Self::Applied { .. } => {}
            _ => *self = Self::Off,
        }
    }

    pub fn deactivate(&mut self) {
        *self = Self::Off;
    }

    pub fn push(&mut self, c: char) {
        if let Self::On { query } = self {
            query.push(c);
        }
    }

    pub fn pop(&mut self) {
        if let Self::On { query } = self {
            query.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_then_applying() {
        let mut search = SearchState::default();
        assert!(search.is_off());

        search.activate();
        search.push('w');
        search.push('e');
        search.push('x');
        search.pop();
        assert!(search.is_on());
        assert_eq!(search.query(), "we");

        search.apply();
        assert_eq!(
            search,
            SearchState::Applied {
                query: "we".into()
            }
        );
        search.push('z');
        assert_eq!(search.query(), "we");
    }

    #[test]
    fn empty_query_turns_off() {
        let mut search = SearchState::default();
        search.activate();
        search.apply();
        assert!(search.is_off());
    }
}
