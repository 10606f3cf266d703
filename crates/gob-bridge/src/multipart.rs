//! GraphQL multipart requests: an `operations` field, a `map` field, then the
//! files the map points at.
//!
//! [`process_request`] returns as soon as `operations` and `map` are read.
//! Every mapped file gets an [`Upload`] placeholder and the remaining parts are
//! streamed by a background task that settles the placeholders as files
//! arrive. Files are buffered to temporary files and stay readable until
//! [`UploadTable::release`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use apollo_compiler::ast;
use bytes::Bytes;
use futures::Stream;
use gob_core::graphql::ast::operations as operation_definitions;
use indexmap::IndexMap;
use log::{debug, warn};
use multer::{Field, Multipart};
use serde_json::{Map, Value, json};
use tempfile::{NamedTempFile, TempPath};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

use crate::error::UploadError;
use crate::upload::{AsyncQueue, Slot};

const MULTIPART_REQUEST_URL: &str = "https://github.com/jaydenseric/graphql-multipart-request-spec";

/// Size and count limits applied while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipartLimits {
    /// Largest `operations` or `map` value, in bytes.
    pub max_field_size: u64,
    pub max_file_size: Option<u64>,
    pub max_files: Option<usize>,
}

impl Default for MultipartLimits {
    fn default() -> Self {
        Self {
            max_field_size: 1_000_000,
            max_file_size: None,
            max_files: None,
        }
    }
}

impl From<&gob_core::config::BridgeSettings> for MultipartLimits {
    fn from(settings: &gob_core::config::BridgeSettings) -> Self {
        Self {
            max_field_size: settings.max_field_size,
            max_file_size: settings.max_file_size,
            max_files: settings.max_files,
        }
    }
}

#[derive(Debug)]
struct FileInner {
    field_name: String,
    filename: String,
    content_type: Option<String>,
    size: u64,
    path: Mutex<Option<TempPath>>,
}

/// An uploaded file, fully buffered on disk.
#[derive(Debug, Clone)]
pub struct FileUpload {
    inner: Arc<FileInner>,
}

impl FileUpload {
    pub fn field_name(&self) -> &str {
        &self.inner.field_name
    }

    pub fn filename(&self) -> &str {
        &self.inner.filename
    }

    pub fn content_type(&self) -> Option<&str> {
        self.inner.content_type.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.inner.size
    }

    fn location(&self) -> Result<PathBuf, UploadError> {
        lock(&self.inner.path)
            .as_ref()
            .map(|path| path.to_path_buf())
            .ok_or_else(|| UploadError::internal("File upload has already been released."))
    }

    /// A fresh reader over the buffered content. May be called any number of
    /// times until the upload is released. The upload only resolves once the
    /// whole file is on disk, so readers never see a partial file.
    pub async fn open(&self) -> Result<tokio::fs::File, UploadError> {
        let path = self.location()?;
        tokio::fs::File::open(path).await.map_err(io_error)
    }

    pub async fn bytes(&self) -> Result<Bytes, UploadError> {
        let path = self.location()?;
        tokio::fs::read(path).await.map(Bytes::from).map_err(io_error)
    }

    /// Delete the buffered content.
    pub fn release(&self) {
        if let Some(path) = lock(&self.inner.path).take() {
            if let Err(error) = path.close() {
                warn!("failed to remove upload buffer for `{}`: {error}", self.filename());
            }
        }
    }

    pub fn is_released(&self) -> bool {
        lock(&self.inner.path).is_none()
    }
}

/// Placeholder for a mapped multipart field.
#[derive(Debug, Clone)]
pub enum Upload {
    /// One file; `None` when an optional file was not sent.
    Single(Slot<Option<FileUpload>>),
    /// Every file sent under a `name[]` field.
    Many(AsyncQueue<FileUpload>),
}

impl Upload {
    pub fn as_single(&self) -> Option<&Slot<Option<FileUpload>>> {
        match self {
            Upload::Single(slot) => Some(slot),
            Upload::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> Option<&AsyncQueue<FileUpload>> {
        match self {
            Upload::Many(queue) => Some(queue),
            Upload::Single(_) => None,
        }
    }

    fn reject(&self, error: UploadError) {
        match self {
            Upload::Single(slot) => {
                slot.reject(error);
            }
            Upload::Many(queue) => {
                queue.reject(error);
            }
        }
    }
}

#[derive(Debug, Clone)]
struct MappedField {
    upload: Upload,
    paths: Vec<String>,
}

/// Placeholders created from the `map` field, plus every file buffered for
/// them.
#[derive(Debug, Clone, Default)]
pub struct UploadTable {
    fields: Arc<IndexMap<String, MappedField>>,
    files: Arc<Mutex<Vec<FileUpload>>>,
}

impl UploadTable {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Placeholder for a multipart field name. `name[]` and `name` are the
    /// same field.
    pub fn field(&self, name: &str) -> Option<&Upload> {
        self.fields
            .get(name)
            .or_else(|| self.fields.get(name.trim_end_matches("[]")))
            .map(|field| &field.upload)
    }

    /// Placeholders keyed by their full map path, e.g. `variables.file` or
    /// `1.variables.files`.
    pub fn by_path(&self) -> IndexMap<String, Upload> {
        self.fields
            .values()
            .flat_map(|field| {
                field
                    .paths
                    .iter()
                    .map(|path| (path.clone(), field.upload.clone()))
            })
            .collect()
    }

    /// Placeholders of one operation, keyed by their path below `variables`.
    /// `index` is `None` for a single (non-batched) operation.
    pub fn variables(&self, index: Option<usize>) -> IndexMap<String, Upload> {
        let prefix = match index {
            Some(index) => format!("{index}.variables."),
            None => "variables.".to_string(),
        };
        self.by_path()
            .into_iter()
            .filter_map(|(path, upload)| {
                path.strip_prefix(&prefix)
                    .map(|rest| (rest.to_string(), upload))
            })
            .collect()
    }

    fn track(&self, file: FileUpload) {
        lock(&self.files).push(file);
    }

    /// Delete every buffered file, consumed or not.
    pub fn release(&self) {
        let files = std::mem::take(&mut *lock(&self.files));
        for file in &files {
            file.release();
        }
        if !files.is_empty() {
            debug!("released {} upload buffer(s)", files.len());
        }
    }

    fn reject_all(&self, error: &UploadError) {
        for field in self.fields.values() {
            field.upload.reject(error.clone());
        }
    }

    /// Settle what is left once the body is fully read: queues end, optional
    /// files become `None`, required ones are reported missing.
    fn finish(&self, required: &RequiredVariables) {
        for field in self.fields.values() {
            match &field.upload {
                Upload::Many(queue) => {
                    queue.terminate();
                }
                Upload::Single(slot) => {
                    if slot.is_settled() {
                        continue;
                    }
                    if field.paths.iter().any(|path| required.is_required(path)) {
                        slot.reject(UploadError::bad_request("File missing in the request."));
                    } else {
                        slot.resolve(None);
                    }
                }
            }
        }
    }
}

/// Background task reading the files that follow `map`.
#[derive(Debug)]
pub struct UploadTask {
    handle: JoinHandle<Result<(), UploadError>>,
}

impl UploadTask {
    /// Wait until the request body is fully read.
    pub async fn finish(self) -> Result<(), UploadError> {
        match self.handle.await {
            Ok(result) => result,
            Err(error) => Err(UploadError::internal(format!("upload task failed: {error}"))),
        }
    }
}

/// Result of reading `operations` and `map`.
#[derive(Debug)]
pub struct ProcessedRequest {
    /// The `operations` value with `null` at every mapped path.
    pub operations: Value,
    pub uploads: UploadTable,
    pub task: UploadTask,
}

impl ProcessedRequest {
    pub fn is_batch(&self) -> bool {
        self.operations.is_array()
    }
}

/// Non-null variables of each operation, keyed by operation index.
#[derive(Debug, Default)]
struct RequiredVariables {
    batched: bool,
    operations: HashMap<usize, HashMap<String, bool>>,
}

impl RequiredVariables {
    fn is_required(&self, path: &str) -> bool {
        let mut segments = path.split('.');
        let index = if self.batched {
            match segments.next().and_then(|s| s.parse::<usize>().ok()) {
                Some(index) => index,
                None => return false,
            }
        } else {
            0
        };
        if segments.next() != Some("variables") {
            return false;
        }
        let Some(name) = segments.next() else {
            return false;
        };
        self.operations
            .get(&index)
            .and_then(|variables| variables.get(name))
            .copied()
            .unwrap_or(false)
    }
}

/// Read `operations` and `map` from a multipart body and start streaming the
/// files in the background.
pub async fn process_request<S, O, E>(
    body: S,
    boundary: impl Into<String>,
    limits: MultipartLimits,
) -> Result<ProcessedRequest, UploadError>
where
    S: Stream<Item = Result<O, E>> + Send + 'static,
    O: Into<Bytes> + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
{
    let mut multipart = Multipart::new(body, boundary);
    let mut parsed: Option<(Value, RequiredVariables)> = None;

    let (operations, uploads, required) = loop {
        let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? else {
            let missing = if parsed.is_none() { "operations" } else { "map" };
            return Err(UploadError::bad_request(format!(
                "Missing multipart field ‘{missing}’ ({MULTIPART_REQUEST_URL})."
            )));
        };
        if field.file_name().is_some() {
            return Err(UploadError::bad_request(format!(
                "Misordered multipart fields; files should follow ‘map’ ({MULTIPART_REQUEST_URL})."
            )));
        }
        match field.name() {
            Some("operations") => {
                let value = read_field(&mut field, "operations", limits.max_field_size).await?;
                parsed = Some(parse_operations(&value)?);
            }
            Some("map") => {
                let Some((mut operations, required)) = parsed.take() else {
                    return Err(UploadError::bad_request(format!(
                        "Misordered multipart fields; ‘map’ should follow ‘operations’ ({MULTIPART_REQUEST_URL})."
                    )));
                };
                let value = read_field(&mut field, "map", limits.max_field_size).await?;
                let uploads = parse_map(&value, &mut operations, limits.max_files)?;
                break (operations, uploads, required);
            }
            other => debug!("ignoring multipart field {other:?} before ‘map’"),
        }
    };

    let table = UploadTable {
        fields: Arc::new(uploads),
        files: Arc::default(),
    };
    let handle = tokio::spawn(stream_files(multipart, table.clone(), required, limits));

    Ok(ProcessedRequest {
        operations,
        uploads: table,
        task: UploadTask { handle },
    })
}

async fn read_field(
    field: &mut Field<'static>,
    name: &str,
    limit: u64,
) -> Result<Vec<u8>, UploadError> {
    let mut value = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        if (value.len() + chunk.len()) as u64 > limit {
            return Err(UploadError::too_large(format!(
                "The ‘{name}’ multipart field value exceeds the {limit} byte size limit."
            )));
        }
        value.extend_from_slice(&chunk);
    }
    Ok(value)
}

fn parse_operations(value: &[u8]) -> Result<(Value, RequiredVariables), UploadError> {
    let operations: Value = serde_json::from_slice(value).map_err(|_| {
        UploadError::bad_request(format!(
            "Invalid JSON in the ‘operations’ multipart field ({MULTIPART_REQUEST_URL})."
        ))
    })?;

    let entries: Vec<&Value> = match &operations {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![&operations],
        _ => {
            return Err(UploadError::bad_request(format!(
                "Invalid type for the ‘operations’ multipart field ({MULTIPART_REQUEST_URL})."
            )));
        }
    };

    let mut required = RequiredVariables {
        batched: operations.is_array(),
        operations: HashMap::new(),
    };
    for (index, entry) in entries.into_iter().enumerate() {
        let Some(query) = entry.get("query") else {
            continue;
        };
        let document = query
            .as_str()
            .ok_or_else(|| "query is not a string".to_string())
            .and_then(|query| {
                ast::Document::parse(query, "operations.graphql")
                    .map_err(|error| error.errors.to_string())
            })
            .map_err(|message| {
                UploadError::bad_request(format!(
                    "Unable to parse graphql documents on ‘operations’: {message}"
                ))
            })?;
        let variables = operation_definitions(&document)
            .flat_map(|operation| operation.variables.iter())
            .map(|variable| (variable.name.to_string(), variable.ty.is_non_null()))
            .collect();
        required.operations.insert(index, variables);
    }
    if required.operations.is_empty() {
        return Err(UploadError::bad_request(
            "Missing ‘query’ field on operations.",
        ));
    }
    Ok((operations, required))
}

fn parse_map(
    value: &[u8],
    operations: &mut Value,
    max_files: Option<usize>,
) -> Result<IndexMap<String, MappedField>, UploadError> {
    let invalid_type = || {
        UploadError::bad_request(format!(
            "Invalid type for the ‘map’ multipart field ({MULTIPART_REQUEST_URL})."
        ))
    };
    let map: Value = serde_json::from_slice(value).map_err(|_| {
        UploadError::bad_request(format!(
            "Invalid JSON in the ‘map’ multipart field ({MULTIPART_REQUEST_URL})."
        ))
    })?;
    let Value::Object(map) = map else {
        return Err(invalid_type());
    };

    if let Some(max) = max_files.filter(|max| map.len() > *max) {
        return Err(UploadError::too_large(format!("{max} max file uploads exceeded.")));
    }

    let mut fields = IndexMap::new();
    for (field_name, paths) in map {
        let Value::Array(paths) = paths else {
            return Err(UploadError::bad_request(format!(
                "Invalid type for the ‘map’ multipart field entry key ‘{field_name}’ array ({MULTIPART_REQUEST_URL})."
            )));
        };
        let is_array = field_name.contains("[]");
        let name = field_name.replace("[]", "");
        let upload = if is_array {
            Upload::Many(AsyncQueue::new())
        } else {
            Upload::Single(Slot::new())
        };

        let mut mapped = Vec::with_capacity(paths.len());
        for (index, path) in paths.into_iter().enumerate() {
            let Value::String(path) = path else {
                return Err(UploadError::bad_request(format!(
                    "Invalid type for the ‘map’ multipart field entry key ‘{name}’ array index ‘{index}’ value ({MULTIPART_REQUEST_URL})."
                )));
            };
            if !set_path(operations, &path, Value::Null) {
                return Err(UploadError::bad_request(format!(
                    "Invalid object path for the ‘map’ multipart field entry key ‘{name}’ array index ‘{index}’ value ‘{path}’ ({MULTIPART_REQUEST_URL})."
                )));
            }
            mapped.push(path);
        }
        fields.insert(
            name,
            MappedField {
                upload,
                paths: mapped,
            },
        );
    }
    Ok(fields)
}

/// Arrays are grown up to this many entries when a map path points past their
/// end.
const MAX_PATH_INDEX: usize = 1024;

/// Set a dotted path (`variables.input.files.0`), creating objects or arrays
/// along the way. Fails when the path crosses a scalar or indexes an array past
/// both its length and [`MAX_PATH_INDEX`].
pub fn set_path(root: &mut Value, path: &str, value: Value) -> bool {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return false;
    }
    let mut current = root;
    for (position, segment) in segments.iter().enumerate() {
        let last = position + 1 == segments.len();
        if current.is_null() {
            *current = match segment.parse::<usize>() {
                Ok(_) => Value::Array(Vec::new()),
                Err(_) => Value::Object(Map::new()),
            };
        }
        let slot = match current {
            Value::Object(object) => object.entry(segment.to_string()).or_insert(Value::Null),
            Value::Array(items) => {
                let Ok(index) = segment.parse::<usize>() else {
                    return false;
                };
                if index >= items.len() {
                    if index >= MAX_PATH_INDEX {
                        return false;
                    }
                    items.resize(index + 1, Value::Null);
                }
                &mut items[index]
            }
            _ => return false,
        };
        if last {
            *slot = value;
            return true;
        }
        current = slot;
    }
    false
}

async fn stream_files(
    mut multipart: Multipart<'static>,
    table: UploadTable,
    required: RequiredVariables,
    limits: MultipartLimits,
) -> Result<(), UploadError> {
    match read_files(&mut multipart, &table, limits).await {
        Ok(()) => {
            table.finish(&required);
            Ok(())
        }
        Err(error) => {
            warn!("multipart upload aborted: {error}");
            table.reject_all(&error);
            Err(error)
        }
    }
}

async fn read_files(
    multipart: &mut Multipart<'static>,
    table: &UploadTable,
    limits: MultipartLimits,
) -> Result<(), UploadError> {
    let mut count = 0usize;
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        count += 1;
        if let Some(max) = limits.max_files.filter(|max| count > *max) {
            return Err(UploadError::too_large(format!("{max} max file uploads exceeded.")));
        }

        let name = field.name().unwrap_or_default().to_string();
        let Some(upload) = table.field(&name) else {
            debug!("ignoring extraneous file field `{name}`");
            continue;
        };
        let content_type = field.content_type().map(ToString::to_string);

        match buffer_file(&mut field, limits.max_file_size).await? {
            Ok((path, size)) => {
                let file = FileUpload {
                    inner: Arc::new(FileInner {
                        field_name: name,
                        filename,
                        content_type,
                        size,
                        path: Mutex::new(Some(path)),
                    }),
                };
                table.track(file.clone());
                match upload {
                    Upload::Single(slot) => {
                        if !slot.resolve(Some(file.clone())) {
                            debug!("field `{}` sent more than one file", file.field_name());
                        }
                    }
                    Upload::Many(queue) => {
                        queue.push(file);
                    }
                }
            }
            Err(error) => {
                debug!("file `{filename}` of field `{name}` rejected: {error}");
                upload.reject(error);
            }
        }
    }
    Ok(())
}

/// Copy one file part to disk. The outer error aborts the whole request, the
/// inner one only this file.
async fn buffer_file(
    field: &mut Field<'static>,
    max_file_size: Option<u64>,
) -> Result<Result<(TempPath, u64), UploadError>, UploadError> {
    let (file, path) = match NamedTempFile::new() {
        Ok(temp) => temp.into_parts(),
        Err(error) => return Ok(Err(io_error(error))),
    };
    let mut file = tokio::fs::File::from_std(file);
    let mut size = 0u64;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        size += chunk.len() as u64;
        if let Some(max) = max_file_size.filter(|max| size > *max) {
            return Ok(Err(UploadError::too_large(format!(
                "File truncated as it exceeds the {max} byte size limit."
            ))));
        }
        if let Err(error) = file.write_all(&chunk).await {
            return Ok(Err(io_error(error)));
        }
    }
    if let Err(error) = file.flush().await {
        return Ok(Err(io_error(error)));
    }
    Ok(Ok((path, size)))
}

fn multipart_error(error: multer::Error) -> UploadError {
    match error {
        multer::Error::StreamReadFailed(_)
        | multer::Error::IncompleteStream
        | multer::Error::IncompleteFieldData { .. }
        | multer::Error::IncompleteHeaders => UploadError::disconnected(),
        other => UploadError::bad_request(other.to_string()),
    }
}

fn io_error(error: std::io::Error) -> UploadError {
    UploadError::internal(format!("failed to buffer upload: {error}"))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The `operations` and `map` parts that turn a plain multipart form into a
/// GraphQL multipart request. `body_fields` maps each body variable to its
/// multipart field name.
pub fn upload_preamble(boundary: &str, query: &str, body_fields: &IndexMap<String, String>) -> Bytes {
    let variables: Map<String, Value> = body_fields
        .keys()
        .map(|variable| (variable.clone(), Value::Null))
        .collect();
    let map: Map<String, Value> = body_fields
        .iter()
        .map(|(variable, field)| (field.clone(), json!([format!("variables.{variable}")])))
        .collect();
    let operations = json!({ "query": query, "variables": variables });

    let delimiter = format!("\r\n--{boundary}\r\n");
    let part = |name: &str, value: &Value| {
        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
    };
    Bytes::from(format!(
        "{delimiter}{}{delimiter}{}",
        part("operations", &operations),
        part("map", &Value::Object(map)),
    ))
}

/// Boundary parameter of a `multipart/form-data` content type.
pub fn boundary(content_type: &str) -> Result<String, UploadError> {
    multer::parse_boundary(content_type).map_err(|error| UploadError::bad_request(error.to_string()))
}

/// Prepend a preamble to a body stream.
pub fn with_preamble<S, E>(preamble: Bytes, body: S) -> impl Stream<Item = Result<Bytes, E>>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    use tokio_stream::StreamExt;
    tokio_stream::once(Ok(preamble)).chain(body)
}

/// Declared length of a body after a preamble was prepended.
pub fn content_length_with_preamble(original: Option<u64>, preamble: &Bytes) -> u64 {
    original.unwrap_or(0) + preamble.len() as u64
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;

    const BOUNDARY: &str = "X-BOUNDARY";

    fn part(name: &str, filename: Option<&str>, value: &str) -> String {
        let disposition = match filename {
            Some(filename) => format!(
                "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: text/plain"
            ),
            None => format!("Content-Disposition: form-data; name=\"{name}\""),
        };
        format!("--{BOUNDARY}\r\n{disposition}\r\n\r\n{value}\r\n")
    }

    fn body(parts: &[String]) -> String {
        format!("{}--{BOUNDARY}--\r\n", parts.concat())
    }

    fn stream(body: String) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        futures::stream::iter(vec![Ok(Bytes::from(body))])
    }

    const OPERATIONS: &str = r#"{"query":"mutation ($file: Upload!, $note: Upload) { upload(file: $file, note: $note) }","variables":{"file":null,"note":null}}"#;

    #[tokio::test]
    async fn resolves_mapped_files() {
        let request = body(&[
            part("operations", None, OPERATIONS),
            part("map", None, r#"{"1":["variables.file"]}"#),
            part("1", Some("a.txt"), "alpha"),
        ]);
        let processed = process_request(stream(request), BOUNDARY, MultipartLimits::default())
            .await
            .unwrap();
        let uploads = processed.uploads.variables(None);
        let slot = uploads["file"].as_single().unwrap().clone();
        let file = slot.wait().await.unwrap().unwrap();
        assert_eq!(file.filename(), "a.txt");
        assert_eq!(file.content_type(), Some("text/plain"));
        assert_eq!(file.bytes().await.unwrap(), Bytes::from("alpha"));
        // Readable more than once.
        assert_eq!(file.size(), 5);
        assert_eq!(file.bytes().await.unwrap().len(), 5);

        processed.task.finish().await.unwrap();
        processed.uploads.release();
        assert!(file.is_released());
        assert!(file.open().await.is_err());
    }

    #[tokio::test]
    async fn opened_files_hold_every_chunk() {
        use tokio::io::AsyncReadExt;

        let content = "0123456789".repeat(2_000);
        let request = body(&[
            part("operations", None, OPERATIONS),
            part("map", None, r#"{"1":["variables.file"]}"#),
            part("1", Some("big.txt"), &content),
        ]);
        let chunks: Vec<Result<Bytes, Infallible>> = request
            .as_bytes()
            .chunks(512)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        let processed = process_request(
            futures::stream::iter(chunks),
            BOUNDARY,
            MultipartLimits::default(),
        )
        .await
        .unwrap();
        let uploads = processed.uploads.variables(None);
        let slot = uploads["file"].as_single().unwrap().clone();
        let file = slot.wait().await.unwrap().unwrap();

        let mut read = String::new();
        file.open().await.unwrap().read_to_string(&mut read).await.unwrap();
        assert_eq!(read.len(), content.len());
        assert_eq!(read, content);

        processed.task.finish().await.unwrap();
        processed.uploads.release();
    }

    #[tokio::test]
    async fn missing_required_file_is_rejected_after_the_body() {
        let request = body(&[
            part("operations", None, OPERATIONS),
            part("map", None, r#"{"1":["variables.file"],"2":["variables.note"]}"#),
        ]);
        let processed = process_request(stream(request), BOUNDARY, MultipartLimits::default())
            .await
            .unwrap();
        let uploads = processed.uploads.variables(None);
        processed.task.finish().await.unwrap();

        let error = uploads["file"].as_single().unwrap().wait().await.unwrap_err();
        assert_eq!(error.status(), 400);
        assert_eq!(error.message(), "File missing in the request.");
        assert_eq!(uploads["note"].as_single().unwrap().wait().await, Ok(None));
    }

    #[tokio::test]
    async fn array_fields_collect_every_file() {
        let operations = r#"{"query":"mutation ($files: Uploads) { many(files: $files) }","variables":{}}"#;
        let request = body(&[
            part("operations", None, operations),
            part("map", None, r#"{"files[]":["variables.files"]}"#),
            part("files", Some("a.txt"), "a"),
            part("files", Some("b.txt"), "bb"),
            part("unmapped", Some("c.txt"), "ignored"),
        ]);
        let processed = process_request(stream(request), BOUNDARY, MultipartLimits::default())
            .await
            .unwrap();
        assert_eq!(processed.operations["variables"]["files"], Value::Null);
        let queue = processed.uploads.variables(None)["files"]
            .as_many()
            .unwrap()
            .clone();
        let mut names = Vec::new();
        while let Some(file) = queue.next().await {
            names.push(file.unwrap().filename().to_string());
        }
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        processed.task.finish().await.unwrap();
    }

    #[tokio::test]
    async fn empty_array_field_terminates() {
        let operations = r#"{"query":"mutation ($files: Uploads) { many(files: $files) }"}"#;
        let request = body(&[
            part("operations", None, operations),
            part("map", None, r#"{"files[]":["variables.files"]}"#),
        ]);
        let processed = process_request(stream(request), BOUNDARY, MultipartLimits::default())
            .await
            .unwrap();
        let queue = processed.uploads.field("files").unwrap().as_many().unwrap().clone();
        assert!(queue.next().await.is_none());
    }

    #[tokio::test]
    async fn rejects_map_paths_past_any_array() {
        let request = body(&[
            part("operations", None, OPERATIONS),
            part("map", None, r#"{"1":["variables.file.18446744073709551615"]}"#),
            part("1", Some("a.txt"), "alpha"),
        ]);
        let error = process_request(stream(request), BOUNDARY, MultipartLimits::default())
            .await
            .unwrap_err();
        assert_eq!(error.status(), 400);
        assert!(error.message().starts_with("Invalid object path for the ‘map’ multipart field entry key ‘1’"));
    }

    #[tokio::test]
    async fn rejects_misordered_fields() {
        let request = body(&[
            part("map", None, r#"{"1":["variables.file"]}"#),
            part("operations", None, OPERATIONS),
        ]);
        let error = process_request(stream(request), BOUNDARY, MultipartLimits::default())
            .await
            .unwrap_err();
        assert_eq!(error.status(), 400);
        assert!(error.message().starts_with("Misordered multipart fields; ‘map’ should follow ‘operations’"));

        let request = body(&[part("1", Some("a.txt"), "alpha")]);
        let error = process_request(stream(request), BOUNDARY, MultipartLimits::default())
            .await
            .unwrap_err();
        assert!(error.message().starts_with("Misordered multipart fields; files should follow ‘map’"));
    }

    #[tokio::test]
    async fn rejects_malformed_fields() {
        let request = body(&[part("operations", None, "{nope")]);
        let error = process_request(stream(request), BOUNDARY, MultipartLimits::default())
            .await
            .unwrap_err();
        assert!(error.message().starts_with("Invalid JSON in the ‘operations’ multipart field"));

        let request = body(&[part("operations", None, r#"{"variables":{}}"#)]);
        let error = process_request(stream(request), BOUNDARY, MultipartLimits::default())
            .await
            .unwrap_err();
        assert_eq!(error.message(), "Missing ‘query’ field on operations.");

        let request = body(&[
            part("operations", None, OPERATIONS),
            part("map", None, r#"{"1":"variables.file"}"#),
        ]);
        let error = process_request(stream(request), BOUNDARY, MultipartLimits::default())
            .await
            .unwrap_err();
        assert!(error.message().starts_with("Invalid type for the ‘map’ multipart field entry key ‘1’ array"));

        let request = body(&[part("operations", None, OPERATIONS)]);
        let error = process_request(stream(request), BOUNDARY, MultipartLimits::default())
            .await
            .unwrap_err();
        assert!(error.message().starts_with("Missing multipart field ‘map’"));
    }

    #[tokio::test]
    async fn enforces_limits() {
        let limits = MultipartLimits {
            max_field_size: 10,
            ..MultipartLimits::default()
        };
        let request = body(&[part("operations", None, OPERATIONS)]);
        let error = process_request(stream(request), BOUNDARY, limits).await.unwrap_err();
        assert_eq!(error.status(), 413);
        assert_eq!(
            error.message(),
            "The ‘operations’ multipart field value exceeds the 10 byte size limit."
        );

        let limits = MultipartLimits {
            max_files: Some(1),
            ..MultipartLimits::default()
        };
        let request = body(&[
            part("operations", None, OPERATIONS),
            part("map", None, r#"{"1":["variables.file"],"2":["variables.note"]}"#),
        ]);
        let error = process_request(stream(request), BOUNDARY, limits).await.unwrap_err();
        assert_eq!(error.status(), 413);
        assert_eq!(error.message(), "1 max file uploads exceeded.");

        let limits = MultipartLimits {
            max_file_size: Some(3),
            ..MultipartLimits::default()
        };
        let request = body(&[
            part("operations", None, OPERATIONS),
            part("map", None, r#"{"1":["variables.file"]}"#),
            part("1", Some("a.txt"), "too long"),
        ]);
        let processed = process_request(stream(request), BOUNDARY, limits).await.unwrap();
        let uploads = processed.uploads.variables(None);
        processed.task.finish().await.unwrap();
        let error = uploads["file"].as_single().unwrap().wait().await.unwrap_err();
        assert_eq!(error.message(), "File truncated as it exceeds the 3 byte size limit.");
    }

    #[tokio::test]
    async fn disconnects_reject_pending_uploads() {
        let head = format!(
            "{}{}--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"1\"; filename=\"a.txt\"\r\n\r\npartial",
            part("operations", None, OPERATIONS),
            part("map", None, r#"{"1":["variables.file"]}"#),
        );
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from(head)),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let processed = process_request(
            futures::stream::iter(chunks),
            BOUNDARY,
            MultipartLimits::default(),
        )
        .await
        .unwrap();
        let uploads = processed.uploads.variables(None);
        let error = processed.task.finish().await.unwrap_err();
        assert!(error.is_disconnect());
        let error = uploads["file"].as_single().unwrap().wait().await.unwrap_err();
        assert_eq!(error.status(), 499);
        assert_eq!(
            error.message(),
            "Request disconnected during file upload stream parsing."
        );
    }

    #[tokio::test]
    async fn batched_operations_are_indexed() {
        let operations = format!("[{OPERATIONS},{OPERATIONS}]");
        let request = body(&[
            part("operations", None, &operations),
            part("map", None, r#"{"1":["1.variables.file"]}"#),
            part("1", Some("a.txt"), "alpha"),
        ]);
        let processed = process_request(stream(request), BOUNDARY, MultipartLimits::default())
            .await
            .unwrap();
        assert!(processed.is_batch());
        assert!(processed.uploads.variables(Some(0)).is_empty());
        let second = processed.uploads.variables(Some(1));
        let file = second["file"].as_single().unwrap().wait().await.unwrap();
        assert_eq!(file.unwrap().filename(), "a.txt");
    }

    #[test]
    fn set_path_creates_containers() {
        let mut value = json!({"variables": {"input": null}});
        assert!(set_path(&mut value, "variables.input.files.1", Value::Bool(true)));
        assert_eq!(value, json!({"variables": {"input": {"files": [null, true]}}}));
        assert!(!set_path(&mut value, "variables..x", Value::Null));
        let mut scalar = json!({"variables": 3});
        assert!(!set_path(&mut scalar, "variables.file", Value::Null));
    }

    #[test]
    fn set_path_rejects_huge_indexes() {
        let mut value = json!({"variables": {"x": null}});
        assert!(!set_path(&mut value, "variables.x.18446744073709551615", Value::Null));
        assert!(!set_path(&mut value, "variables.x.2305843009213693951", Value::Null));
        assert!(!set_path(&mut value, "variables.x.1024", Value::Null));
        assert!(set_path(&mut value, "variables.x.1023", Value::Null));
        assert_eq!(value["variables"]["x"].as_array().map(Vec::len), Some(1024));

        let mut files = json!({"variables": {"files": [null, null]}});
        assert!(set_path(&mut files, "variables.files.1", Value::Bool(true)));
        assert_eq!(files, json!({"variables": {"files": [null, true]}}));
    }

    #[tokio::test]
    async fn preamble_turns_forms_into_upload_requests() {
        let mut fields = IndexMap::new();
        fields.insert("file".to_string(), "upload".to_string());
        let preamble = upload_preamble(BOUNDARY, "mutation ($file: Upload!) { upload(file: $file) }", &fields);
        let form = body(&[part("upload", Some("a.txt"), "alpha")]);
        assert_eq!(
            content_length_with_preamble(Some(form.len() as u64), &preamble),
            (preamble.len() + form.len()) as u64
        );

        let text = String::from_utf8(preamble.to_vec()).unwrap();
        assert!(text.starts_with(&format!("\r\n--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"operations\"\r\n\r\n")));
        assert!(text.ends_with("name=\"map\"\r\n\r\n{\"upload\":[\"variables.file\"]}\r\n"));

        let stream = with_preamble(preamble, stream(form));
        let processed = process_request(stream, BOUNDARY, MultipartLimits::default())
            .await
            .unwrap();
        assert_eq!(processed.operations["variables"], json!({"file": null}));
        let file = processed.uploads.variables(None)["file"]
            .as_single()
            .unwrap()
            .wait()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file.bytes().await.unwrap(), Bytes::from("alpha"));
    }
}
