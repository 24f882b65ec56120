//! Typed option sets for the request operations, carrying the node's
//! conventional defaults. Extra `Key=Value` pairs are appended after the
//! typed fields; insertion order is what goes on the wire.

use std::time::Duration;

use fcp_core::{FieldError, Fields};

/// How long the node keeps tracking a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Dropped when this connection ends.
    Connection,
    /// Survives the connection, not a node restart.
    Reboot,
    /// Survives node restarts.
    Forever,
}

impl Persistence {
    pub fn as_str(self) -> &'static str {
        match self {
            Persistence::Connection => "connection",
            Persistence::Reboot => "reboot",
            Persistence::Forever => "forever",
        }
    }
}

/// Where the node takes insert data from.
#[derive(Debug, Clone)]
pub enum UploadFrom {
    /// Payload is sent inline with the request.
    Direct,
    /// File local to the node.
    Disk(String),
    /// Insert a redirect to another URI.
    Redirect(String),
}

/// Options for a fetch.
#[derive(Debug, Clone)]
pub struct GetOptions {
    /// Caller-supplied identifier; generated when absent.
    pub identifier: Option<String>,
    pub ignore_data_store: bool,
    pub data_store_only: bool,
    pub verbosity: u32,
    pub return_type: String,
    pub priority_class: u32,
    pub persistence: Persistence,
    pub global: bool,
    /// Local deadline; never transmitted to the node.
    pub timeout: Option<Duration>,
    /// Additional fields appended verbatim. A key colliding with a typed
    /// field is rejected at enqueue time.
    pub extra: Vec<(String, String)>,
}

impl Default for GetOptions {
    fn default() -> Self {
        GetOptions {
            identifier: None,
            ignore_data_store: false,
            data_store_only: false,
            verbosity: 1,
            return_type: "direct".to_string(),
            priority_class: 1,
            persistence: Persistence::Reboot,
            global: false,
            timeout: None,
            extra: Vec::new(),
        }
    }
}

impl GetOptions {
    pub(crate) fn build_fields(&self, identifier: &str, uri: &str) -> Result<Fields, FieldError> {
        let mut fields = Fields::new();
        fields.insert("Identifier", identifier)?;
        fields.insert("URI", uri)?;
        fields.insert("IgnoreDS", bool_str(self.ignore_data_store))?;
        fields.insert("DSOnly", bool_str(self.data_store_only))?;
        fields.insert("Verbosity", self.verbosity.to_string())?;
        fields.insert("ReturnType", self.return_type.as_str())?;
        fields.insert("PriorityClass", self.priority_class.to_string())?;
        fields.insert("Persistence", self.persistence.as_str())?;
        fields.insert("Global", bool_str(self.global))?;
        finish_fields(fields, self.timeout, &self.extra)
    }
}

/// Options for a store.
#[derive(Debug, Clone)]
pub struct PutOptions {
    pub identifier: Option<String>,
    pub content_type: String,
    pub verbosity: u32,
    pub max_retries: u32,
    pub persistence: Persistence,
    pub upload_from: UploadFrom,
    pub timeout: Option<Duration>,
    pub extra: Vec<(String, String)>,
}

impl Default for PutOptions {
    fn default() -> Self {
        PutOptions {
            identifier: None,
            content_type: "application/octet-stream".to_string(),
            verbosity: 1,
            max_retries: 10,
            persistence: Persistence::Reboot,
            upload_from: UploadFrom::Direct,
            timeout: None,
            extra: Vec::new(),
        }
    }
}

impl PutOptions {
    pub(crate) fn build_fields(&self, identifier: &str, uri: &str) -> Result<Fields, FieldError> {
        let mut fields = Fields::new();
        fields.insert("Identifier", identifier)?;
        fields.insert("URI", uri)?;
        fields.insert("Metadata.ContentType", self.content_type.as_str())?;
        fields.insert("Verbosity", self.verbosity.to_string())?;
        fields.insert("MaxRetries", self.max_retries.to_string())?;
        fields.insert("Persistence", self.persistence.as_str())?;
        match &self.upload_from {
            UploadFrom::Direct => fields.insert("UploadFrom", "direct")?,
            UploadFrom::Disk(path) => {
                fields.insert("UploadFrom", "disk")?;
                fields.insert("Filename", path.as_str())?;
            }
            UploadFrom::Redirect(target) => {
                fields.insert("UploadFrom", "redirect")?;
                fields.insert("TargetURI", target.as_str())?;
            }
        }
        finish_fields(fields, self.timeout, &self.extra)
    }
}

/// Options for storing a directory local to the node.
#[derive(Debug, Clone)]
pub struct PutDirOptions {
    pub identifier: Option<String>,
    pub verbosity: u32,
    pub max_retries: u32,
    pub priority_class: u32,
    pub default_name: String,
    pub allow_unreadable_files: bool,
    /// Omitted from the wire when `None`; synchronous calls force
    /// connection scope.
    pub persistence: Option<Persistence>,
    pub timeout: Option<Duration>,
    pub extra: Vec<(String, String)>,
}

impl Default for PutDirOptions {
    fn default() -> Self {
        PutDirOptions {
            identifier: None,
            verbosity: 1,
            max_retries: 10,
            priority_class: 3,
            default_name: "index.html".to_string(),
            allow_unreadable_files: true,
            persistence: None,
            timeout: None,
            extra: Vec::new(),
        }
    }
}

impl PutDirOptions {
    pub(crate) fn build_fields(
        &self,
        identifier: &str,
        uri: &str,
        dir: &str,
    ) -> Result<Fields, FieldError> {
        let mut fields = Fields::new();
        fields.insert("Identifier", identifier)?;
        fields.insert("URI", uri)?;
        fields.insert("Verbosity", self.verbosity.to_string())?;
        fields.insert("MaxRetries", self.max_retries.to_string())?;
        fields.insert("PriorityClass", self.priority_class.to_string())?;
        fields.insert("DefaultName", self.default_name.as_str())?;
        fields.insert("Filename", dir)?;
        fields.insert(
            "AllowUnreadableFiles",
            bool_str(self.allow_unreadable_files),
        )?;
        if let Some(persistence) = self.persistence {
            fields.insert("Persistence", persistence.as_str())?;
        }
        finish_fields(fields, self.timeout, &self.extra)
    }
}

fn finish_fields(
    mut fields: Fields,
    timeout: Option<Duration>,
    extra: &[(String, String)],
) -> Result<Fields, FieldError> {
    if let Some(timeout) = timeout {
        fields.insert("Timeout", timeout.as_secs_f64().to_string())?;
    }
    for (key, value) in extra {
        fields.insert(key.clone(), value.clone())?;
    }
    Ok(fields)
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_defaults_match_node_conventions() {
        let fields = GetOptions::default()
            .build_fields("Req-1", "KSK@gpl.txt")
            .unwrap();
        assert_eq!(fields.get("IgnoreDS"), Some("false"));
        assert_eq!(fields.get("ReturnType"), Some("direct"));
        assert_eq!(fields.get("PriorityClass"), Some("1"));
        assert_eq!(fields.get("Persistence"), Some("reboot"));
        let first: Vec<&str> = fields.iter().take(2).map(|(k, _)| k).collect();
        assert_eq!(first, ["Identifier", "URI"]);
    }

    #[test]
    fn put_upload_from_variants() {
        let mut options = PutOptions::default();
        options.upload_from = UploadFrom::Disk("/tmp/file".to_string());
        let fields = options.build_fields("Req-2", "KSK@file").unwrap();
        assert_eq!(fields.get("UploadFrom"), Some("disk"));
        assert_eq!(fields.get("Filename"), Some("/tmp/file"));

        options.upload_from = UploadFrom::Redirect("KSK@target".to_string());
        let fields = options.build_fields("Req-2", "KSK@file").unwrap();
        assert_eq!(fields.get("UploadFrom"), Some("redirect"));
        assert_eq!(fields.get("TargetURI"), Some("KSK@target"));
    }

    #[test]
    fn put_dir_defaults() {
        let fields = PutDirOptions::default()
            .build_fields("Req-3", "USK@key/site/0", "/srv/site")
            .unwrap();
        assert_eq!(fields.get("DefaultName"), Some("index.html"));
        assert_eq!(fields.get("PriorityClass"), Some("3"));
        assert_eq!(fields.get("AllowUnreadableFiles"), Some("true"));
        assert!(!fields.contains("Persistence"));
    }

    #[test]
    fn timeout_and_extras_are_appended() {
        let mut options = GetOptions::default();
        options.timeout = Some(Duration::from_millis(1500));
        options
            .extra
            .push(("MaxSize".to_string(), "1048576".to_string()));
        let fields = options.build_fields("Req-4", "KSK@gpl.txt").unwrap();
        assert_eq!(fields.get("Timeout"), Some("1.5"));
        assert_eq!(fields.get("MaxSize"), Some("1048576"));
    }

    #[test]
    fn extra_colliding_with_typed_field_is_rejected() {
        let mut options = GetOptions::default();
        options
            .extra
            .push(("ReturnType".to_string(), "none".to_string()));
        assert!(options.build_fields("Req-5", "KSK@gpl.txt").is_err());
    }
}
