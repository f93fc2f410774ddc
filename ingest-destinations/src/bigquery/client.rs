use std::collections::BTreeSet;
use std::fmt;
use std::time::Instant;

use gcp_bigquery_client::client_builder::ClientBuilder;
use gcp_bigquery_client::model::dataset::Dataset;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::query_response::{QueryResponse, ResultSet};
use gcp_bigquery_client::model::table_data_insert_all_request::TableDataInsertAllRequest;
use gcp_bigquery_client::yup_oauth2::parse_service_account_key;
use gcp_bigquery_client::{Client, error::BQError};
use ingest::error::{ErrorKind, IngestError, IngestResult};
use ingest::types::{ColumnDefinition, DataType, NormalizedRow};
use ingest::warehouse::{JobHandle, JobState, TableRef};
use ingest::{bail, ingest_error};
use metrics::{counter, histogram};
use tracing::{debug, info};

use crate::bigquery::encoding::{bigquery_to_data_type, insert_id, row_to_insert_object};
use crate::bigquery::metrics::{
    BQ_INSERT_ALL_DURATION_SECONDS, BQ_INSERT_ALL_ROW_ERRORS_TOTAL, BQ_QUERIES_TOTAL,
};
use crate::bigquery::validation::{quote_string, sanitize_identifier, validate_dataset_id};

/// BigQuery project identifier.
pub type BigQueryProjectId = String;
/// BigQuery dataset identifier.
pub type BigQueryDatasetId = String;
/// BigQuery table identifier.
pub type BigQueryTableId = String;

/// Separator between the location and the id of a job in a [`JobHandle`].
const JOB_HANDLE_SEPARATOR: char = '/';

/// What a request operated on, used to classify "not found" responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorContext {
    Dataset,
    Table,
    Other,
}

/// Converts BigQuery errors to load errors with appropriate classification.
///
/// Transport failures, throttling and server-side errors are mapped to
/// [`ErrorKind::DestinationConnectionFailed`] so that callers retry them.
pub(crate) fn bq_error_to_ingest_error(err: BQError, context: ErrorContext) -> IngestError {
    let (kind, description) = match &err {
        BQError::InvalidServiceAccountKey(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account key",
        ),
        BQError::InvalidServiceAccountAuthenticator(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account authenticator",
        ),
        BQError::AuthError(_) => (
            ErrorKind::AuthenticationError,
            "BigQuery authentication error",
        ),
        BQError::YupAuthError(_) => (
            ErrorKind::AuthenticationError,
            "BigQuery OAuth authentication error",
        ),
        BQError::NoToken => (
            ErrorKind::AuthenticationError,
            "BigQuery authentication token missing",
        ),

        BQError::RequestError(_) => (
            ErrorKind::DestinationConnectionFailed,
            "BigQuery request failed",
        ),

        BQError::ResponseError { error } => match (error.error.code, context) {
            (404, ErrorContext::Dataset) => (
                ErrorKind::DestinationNamespaceMissing,
                "BigQuery dataset not found",
            ),
            (404, ErrorContext::Table) => (
                ErrorKind::DestinationTableMissing,
                "BigQuery table not found",
            ),
            (409, ErrorContext::Dataset) => (
                ErrorKind::DestinationNamespaceAlreadyExists,
                "BigQuery dataset already exists",
            ),
            (401 | 403, _) if is_rate_limit_reason(&err) => (
                ErrorKind::DestinationConnectionFailed,
                "BigQuery quota exceeded",
            ),
            (401 | 403, _) => (
                ErrorKind::AuthenticationError,
                "BigQuery request not authorized",
            ),
            (429, _) | (500..=599, _) => (
                ErrorKind::DestinationConnectionFailed,
                "BigQuery temporarily unavailable",
            ),
            _ => (ErrorKind::DestinationQueryFailed, "BigQuery response error"),
        },

        BQError::NoDataAvailable => (
            ErrorKind::InvalidState,
            "BigQuery result set positioning error",
        ),
        BQError::InvalidColumnName { .. } => {
            (ErrorKind::InvalidData, "BigQuery invalid column name")
        }
        BQError::InvalidColumnType { .. } => {
            (ErrorKind::ConversionError, "BigQuery column type mismatch")
        }
        BQError::SerializationError(_) => (
            ErrorKind::SerializationError,
            "BigQuery JSON serialization error",
        ),

        _ => (ErrorKind::DestinationQueryFailed, "BigQuery error"),
    };

    ingest_error!(kind, description, err.to_string())
}

/// Returns `true` for 403 responses that report a rate or quota limit.
fn is_rate_limit_reason(err: &BQError) -> bool {
    let message = err.to_string();
    message.contains("rateLimitExceeded") || message.contains("quotaExceeded")
}

/// Splits a job handle into its location and job id.
fn parse_job_handle(handle: &JobHandle) -> (Option<&str>, &str) {
    match handle.id.split_once(JOB_HANDLE_SEPARATOR) {
        Some((location, job_id)) => (Some(location), job_id),
        None => (None, handle.id.as_str()),
    }
}

/// Client for interacting with Google BigQuery through its REST API.
///
/// Datasets are the namespaces of the load engine.
#[derive(Clone)]
pub struct BigQueryClient {
    project_id: BigQueryProjectId,
    location: Option<String>,
    client: Client,
}

impl BigQueryClient {
    /// Creates a new [`BigQueryClient`] from a service account key JSON string.
    ///
    /// Datasets created by the client are placed in `location` when set.
    pub async fn new_with_key(
        project_id: BigQueryProjectId,
        sa_key: &str,
        location: Option<String>,
    ) -> IngestResult<BigQueryClient> {
        let sa_key = parse_service_account_key(sa_key)
            .map_err(BQError::from)
            .map_err(|err| bq_error_to_ingest_error(err, ErrorContext::Other))?;
        let client = ClientBuilder::new()
            .build_from_service_account_key(sa_key, false)
            .await
            .map_err(|err| bq_error_to_ingest_error(err, ErrorContext::Other))?;

        Ok(BigQueryClient {
            project_id,
            location,
            client,
        })
    }

    /// Returns the fully qualified BigQuery table name.
    ///
    /// Formats the table name as `project_id.dataset_id.table_id` with proper quoting.
    pub fn full_table_name(
        &self,
        dataset_id: &BigQueryDatasetId,
        table_id: &BigQueryTableId,
    ) -> IngestResult<String> {
        let project_id = sanitize_identifier(&self.project_id, "BigQuery project id")?;
        let dataset_id = sanitize_identifier(dataset_id, "BigQuery dataset id")?;
        let table_id = sanitize_identifier(table_id, "BigQuery table id")?;

        Ok(format!("`{project_id}.{dataset_id}.{table_id}`"))
    }

    /// Returns the quoted name of a view of the dataset's `INFORMATION_SCHEMA`.
    fn information_schema(&self, dataset_id: &BigQueryDatasetId, view: &str) -> IngestResult<String> {
        let project_id = sanitize_identifier(&self.project_id, "BigQuery project id")?;
        let dataset_id = sanitize_identifier(dataset_id, "BigQuery dataset id")?;

        Ok(format!("`{project_id}.{dataset_id}`.INFORMATION_SCHEMA.{view}"))
    }

    /// Creates an empty dataset.
    pub async fn create_dataset(&self, dataset_id: &BigQueryDatasetId) -> IngestResult<()> {
        validate_dataset_id(dataset_id)?;

        let mut dataset = Dataset::new(&self.project_id, dataset_id);
        if let Some(location) = &self.location {
            dataset = dataset.location(location);
        }

        info!(dataset = %dataset_id, "creating dataset in bigquery");

        self.client
            .dataset()
            .create(dataset)
            .await
            .map_err(|err| bq_error_to_ingest_error(err, ErrorContext::Dataset))?;

        Ok(())
    }

    /// Deletes a dataset, together with its tables when `delete_contents` is set.
    pub async fn delete_dataset(
        &self,
        dataset_id: &BigQueryDatasetId,
        delete_contents: bool,
    ) -> IngestResult<()> {
        validate_dataset_id(dataset_id)?;

        info!(dataset = %dataset_id, delete_contents, "deleting dataset from bigquery");

        self.client
            .dataset()
            .delete(&self.project_id, dataset_id, delete_contents)
            .await
            .map_err(|err| bq_error_to_ingest_error(err, ErrorContext::Dataset))
    }

    /// Checks whether a table exists in the BigQuery dataset.
    ///
    /// A missing dataset holds no tables. Errors other than "not found" are returned.
    pub async fn table_exists(
        &self,
        dataset_id: &BigQueryDatasetId,
        table_id: &BigQueryTableId,
    ) -> IngestResult<bool> {
        let table = self
            .client
            .table()
            .get(&self.project_id, dataset_id, table_id, None)
            .await;

        match table {
            Ok(_) => Ok(true),
            Err(BQError::ResponseError { error }) if error.error.code == 404 => Ok(false),
            Err(err) => Err(bq_error_to_ingest_error(err, ErrorContext::Table)),
        }
    }

    /// Returns the columns of a table in declaration order.
    pub async fn get_columns(
        &self,
        dataset_id: &BigQueryDatasetId,
        table_id: &BigQueryTableId,
    ) -> IngestResult<Vec<ColumnDefinition>> {
        let query = format!(
            "select column_name, data_type, is_nullable from {} where table_name = {} order by ordinal_position",
            self.information_schema(dataset_id, "COLUMNS")?,
            quote_string(table_id)
        );

        let mut result_set = self.query(QueryRequest::new(query), ErrorContext::Dataset).await?;

        let mut columns = Vec::new();
        while result_set.next_row() {
            let name = required_string(&result_set, "column_name")?;
            let data_type = required_string(&result_set, "data_type")?;
            let nullable = required_string(&result_set, "is_nullable")?;

            columns.push(ColumnDefinition {
                name,
                data_type: bigquery_to_data_type(&data_type),
                nullable: nullable.eq_ignore_ascii_case("YES"),
            });
        }

        if columns.is_empty() {
            bail!(
                ErrorKind::DestinationTableMissing,
                "BigQuery table not found",
                format!("table `{dataset_id}.{table_id}` has no columns")
            );
        }

        Ok(columns)
    }

    /// Returns the names of the tables of a dataset.
    pub async fn list_tables(&self, dataset_id: &BigQueryDatasetId) -> IngestResult<BTreeSet<String>> {
        let query = format!(
            "select table_name from {} where table_type = 'BASE TABLE'",
            self.information_schema(dataset_id, "TABLES")?
        );

        let mut result_set = self.query(QueryRequest::new(query), ErrorContext::Dataset).await?;

        let mut tables = BTreeSet::new();
        while result_set.next_row() {
            tables.insert(required_string(&result_set, "table_name")?);
        }

        Ok(tables)
    }

    /// Returns the data type of a column, or `None` when the table has no such column.
    pub async fn column_type(
        &self,
        dataset_id: &BigQueryDatasetId,
        table_id: &BigQueryTableId,
        column: &str,
    ) -> IngestResult<Option<DataType>> {
        let columns = self.get_columns(dataset_id, table_id).await?;

        Ok(columns
            .into_iter()
            .find(|candidate| candidate.name == column)
            .map(|candidate| candidate.data_type))
    }

    /// Streams rows into a table with `tabledata.insertAll`.
    ///
    /// Every row carries an `insertId` derived from its content, so a retried request does not
    /// duplicate rows that already landed. Any rejected row fails the whole call.
    pub async fn insert_rows(&self, table: &TableRef, rows: &[NormalizedRow]) -> IngestResult<()> {
        validate_dataset_id(&table.namespace)?;

        let mut request = TableDataInsertAllRequest::new();
        for row in rows {
            let object = row_to_insert_object(row);
            let insert_id = insert_id(table, &object);
            request
                .add_row(Some(insert_id), object)
                .map_err(|err| bq_error_to_ingest_error(err, ErrorContext::Other))?;
        }

        let started = Instant::now();
        let response = self
            .client
            .tabledata()
            .insert_all(&self.project_id, &table.namespace, &table.table, request)
            .await;
        histogram!(BQ_INSERT_ALL_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        let response = match response {
            Ok(response) => response,
            // Tables created moments ago are not visible to the streaming API right away.
            Err(BQError::ResponseError { error }) if error.error.code == 404 => {
                bail!(
                    ErrorKind::DestinationTableNotReady,
                    "BigQuery table not ready for streaming",
                    format!("table `{table}` is not visible to insertAll yet")
                );
            }
            Err(err) => return Err(bq_error_to_ingest_error(err, ErrorContext::Table)),
        };

        if let Some(insert_errors) = response.insert_errors
            && !insert_errors.is_empty()
        {
            counter!(BQ_INSERT_ALL_ROW_ERRORS_TOTAL).increment(insert_errors.len() as u64);
            bail!(
                ErrorKind::InvalidData,
                "BigQuery rejected rows",
                format!(
                    "{} of {} rows were rejected by `{table}`: {:?}",
                    insert_errors.len(),
                    rows.len(),
                    insert_errors.first()
                )
            );
        }

        debug!(table = %table, rows = rows.len(), "streamed rows into bigquery");

        Ok(())
    }

    /// Starts a job copying `source` into the not yet existing table `destination`.
    pub async fn start_copy(&self, source: &TableRef, destination: &TableRef) -> IngestResult<JobHandle> {
        let source_name = self.full_table_name(&source.namespace, &source.table)?;
        let destination_name = self.full_table_name(&destination.namespace, &destination.table)?;

        info!(from = %source, to = %destination, "copying table in bigquery");

        let query = format!("create table {destination_name} copy {source_name}");
        let response = self.query_response(QueryRequest::new(query), ErrorContext::Table).await?;

        let Some(job_reference) = response.job_reference else {
            bail!(
                ErrorKind::DestinationJobFailed,
                "BigQuery copy job not started",
                format!("no job reference returned for copying `{source}` to `{destination}`")
            );
        };
        let Some(job_id) = job_reference.job_id else {
            bail!(
                ErrorKind::DestinationJobFailed,
                "BigQuery copy job not started",
                format!("no job id returned for copying `{source}` to `{destination}`")
            );
        };

        let handle = match job_reference.location.or_else(|| self.location.clone()) {
            Some(location) => format!("{location}{JOB_HANDLE_SEPARATOR}{job_id}"),
            None => job_id,
        };

        Ok(JobHandle::new(handle))
    }

    /// Returns the state of a job started by this client.
    pub async fn job_state(&self, handle: &JobHandle) -> IngestResult<JobState> {
        let (location, job_id) = parse_job_handle(handle);

        let job = self
            .client
            .job()
            .get_job(&self.project_id, job_id, location)
            .await
            .map_err(|err| bq_error_to_ingest_error(err, ErrorContext::Other))?;

        let Some(status) = job.status else {
            return Ok(JobState::Pending);
        };

        if let Some(error_result) = status.error_result {
            let reason = error_result
                .message
                .unwrap_or_else(|| "unknown job error".to_string());
            return Ok(JobState::Failed(reason));
        }

        let state = match status.state.as_deref() {
            Some("PENDING") | None => JobState::Pending,
            Some("RUNNING") => JobState::Running,
            Some("DONE") => JobState::Done,
            Some(other) => JobState::Unknown(other.to_string()),
        };

        Ok(state)
    }

    /// Executes a DML statement and returns the number of affected rows.
    pub async fn execute_dml(&self, query: String) -> IngestResult<u64> {
        let response = self.query_response(QueryRequest::new(query), ErrorContext::Table).await?;

        let Some(affected_rows) = response.num_dml_affected_rows else {
            return Ok(0);
        };

        Ok(affected_rows.parse()?)
    }

    /// Executes a statement whose result is not needed.
    pub async fn execute(&self, query: String) -> IngestResult<()> {
        let _ = self.query_response(QueryRequest::new(query), ErrorContext::Table).await?;

        Ok(())
    }

    /// Executes a query returning at most one string column named `value` and returns it.
    pub async fn query_single_string(&self, query: String) -> IngestResult<Option<String>> {
        let mut result_set = self.query(QueryRequest::new(query), ErrorContext::Table).await?;

        if !result_set.next_row() {
            return Ok(None);
        }

        result_set
            .get_string_by_name("value")
            .map_err(|err| bq_error_to_ingest_error(err, ErrorContext::Other))
    }

    /// Executes a BigQuery SQL query and returns the result set.
    pub async fn query(&self, request: QueryRequest, context: ErrorContext) -> IngestResult<ResultSet> {
        let query_response = self.query_response(request, context).await?;

        Ok(ResultSet::new_from_query_response(query_response))
    }

    async fn query_response(
        &self,
        mut request: QueryRequest,
        context: ErrorContext,
    ) -> IngestResult<QueryResponse> {
        if request.location.is_none() {
            request.location = self.location.clone();
        }

        debug!(query = %request.query, "executing bigquery query");

        let response = self
            .client
            .job()
            .query(&self.project_id, request)
            .await;

        let status = if response.is_ok() { "ok" } else { "error" };
        counter!(BQ_QUERIES_TOTAL, "status" => status).increment(1);

        response.map_err(|err| bq_error_to_ingest_error(err, context))
    }
}

/// Reads a string column that must be present in the current row.
fn required_string(result_set: &ResultSet, column: &str) -> IngestResult<String> {
    match result_set.get_string_by_name(column) {
        Ok(Some(value)) => Ok(value),
        Ok(None) => bail!(
            ErrorKind::InvalidData,
            "Missing value in BigQuery result",
            format!("column `{column}` is null")
        ),
        Err(err) => Err(bq_error_to_ingest_error(err, ErrorContext::Other)),
    }
}

impl fmt::Debug for BigQueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BigQueryClient")
            .field("project_id", &self.project_id)
            .field("location", &self.location)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_handle() {
        let handle = JobHandle::new("EU/job_123");
        assert_eq!(parse_job_handle(&handle), (Some("EU"), "job_123"));

        let handle = JobHandle::new("job_123");
        assert_eq!(parse_job_handle(&handle), (None, "job_123"));
    }

    #[test]
    fn test_auth_errors_are_classified() {
        let err = bq_error_to_ingest_error(BQError::NoToken, ErrorContext::Other);

        assert_eq!(err.kind(), ErrorKind::AuthenticationError);
    }

    #[test]
    fn test_result_set_errors_are_classified() {
        let err = bq_error_to_ingest_error(BQError::NoDataAvailable, ErrorContext::Table);

        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }
}
