use fail::FailScenario;

/// Configures failpoints for the lifetime of the scenario and turns them off when dropped.
pub struct IngestFailScenario<'a> {
    _scenario: FailScenario<'a>,
    failpoints: Vec<(String, String)>,
}

impl<'a> IngestFailScenario<'a> {
    pub fn setup(failpoints: &[(&str, &str)]) -> IngestFailScenario<'a> {
        let scenario = FailScenario::setup();
        let failpoints = failpoints
            .iter()
            .map(|(name, action)| (name.to_string(), action.to_string()))
            .collect::<Vec<_>>();

        for (failpoint, action) in failpoints.iter() {
            fail::cfg(failpoint, action).unwrap()
        }

        Self {
            _scenario: scenario,
            failpoints,
        }
    }

    pub fn teardown(self) {
        drop(self);
    }
}

impl Drop for IngestFailScenario<'_> {
    fn drop(&mut self) {
        for (failpoint, _) in self.failpoints.iter() {
            fail::cfg(failpoint, "off").unwrap()
        }
    }
}
