use fail::FailScenario;

/// Configures fail points for the duration of a test and turns them off when dropped.
pub struct ScopedFailpoints<'a> {
    _scenario: FailScenario<'a>,
    names: Vec<String>,
}

impl<'a> ScopedFailpoints<'a> {
    /// Applies each `(name, action)` pair, `action` using the `fail` crate syntax.
    ///
    /// # Panics
    ///
    /// Panics if an action does not parse.
    pub fn setup(failpoints: &[(&str, &str)]) -> ScopedFailpoints<'a> {
        let scenario = FailScenario::setup();

        for (name, action) in failpoints {
            if let Err(err) = fail::cfg(*name, action) {
                panic!("invalid action `{action}` for fail point `{name}`: {err}");
            }
        }

        Self {
            _scenario: scenario,
            names: failpoints.iter().map(|(name, _)| name.to_string()).collect(),
        }
    }
}

impl Drop for ScopedFailpoints<'_> {
    fn drop(&mut self) {
        for name in &self.names {
            fail::remove(name);
        }
    }
}
