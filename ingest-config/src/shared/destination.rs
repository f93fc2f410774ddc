use secrecy::SecretString;
use serde::Deserialize;

/// Configuration of the warehouse rows are loaded into.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationConfig {
    /// In-process warehouse, contents are lost when the process exits.
    Memory,
    /// Google BigQuery, where datasets act as namespaces.
    BigQuery {
        /// Google Cloud project identifier.
        project_id: String,
        /// Service account key for authenticating with BigQuery.
        service_account_key: SecretString,
        /// Location used to look up copy jobs, e.g. `EU` or `US`.
        #[serde(default)]
        location: Option<String>,
    },
}
