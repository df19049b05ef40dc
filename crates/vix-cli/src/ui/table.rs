//! Table rendering for CLI output using comfy-table.
//!
//! | Command | Table Function |
//! |---------|----------------|
//! | `vix profile list` | `render_profiles_table()` |
//! | `vix collections` | `render_collections_table()` |
//! | `vix providers` | `render_providers_table()` |
//! | `vix vault status` | `render_secrets_table()` |
//! | `vix backups` | `render_backups_table()` |

use comfy_table::presets::NOTHING;
use comfy_table::{Cell, CellAlignment, ColumnConstraint, Table, Width};

use vix_core::{BackupEntry, CollectionDescriptor, ConnectionProfile};
use vix_db::{ProviderCapabilities, ProviderKind};

use super::format::{format_relative_time, format_thousands, or_dash, truncate_str};

/// Secret presence for one profile in `vix vault status`.
#[derive(Debug, Clone)]
pub struct SecretRow {
    pub profile: String,
    pub key: String,
    pub present: bool,
}

fn new_table(headers: Vec<Cell>, constraints: Vec<ColumnConstraint>) -> Table {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_header(headers);
    table.set_constraints(constraints);
    table
}

/// Render the profile table.
///
/// # Example Output
///
/// ```text
/// NAME        PROVIDER   ENDPOINT                    SECRET   ID         UPDATED
/// Local dev   local      path=/tmp/vix               no       1f2e3d4c   just now
/// Prod        qdrant     url=https://q.example:6333  yes      9a8b7c6d   2d ago
/// ```
pub fn render_profiles_table(profiles: &[ConnectionProfile]) -> String {
    if profiles.is_empty() {
        return String::new();
    }

    let mut table = new_table(
        vec![
            Cell::new("NAME"),
            Cell::new("PROVIDER"),
            Cell::new("ENDPOINT"),
            Cell::new("SECRET"),
            Cell::new("ID"),
            Cell::new("UPDATED"),
        ],
        vec![
            ColumnConstraint::LowerBoundary(Width::Fixed(8)),
            ColumnConstraint::LowerBoundary(Width::Fixed(8)),
            ColumnConstraint::UpperBoundary(Width::Fixed(48)),
            ColumnConstraint::LowerBoundary(Width::Fixed(6)),
            ColumnConstraint::LowerBoundary(Width::Fixed(8)),
            ColumnConstraint::LowerBoundary(Width::Fixed(10)),
        ],
    );

    for profile in profiles {
        table.add_row(vec![
            Cell::new(truncate_str(&profile.name, 24)),
            Cell::new(profile.provider),
            Cell::new(truncate_str(&profile.endpoint.summary(), 48)),
            Cell::new(if profile.credential_ref.is_some() { "yes" } else { "no" }),
            Cell::new(profile.id.as_str().get(..8).unwrap_or(profile.id.as_str())),
            Cell::new(format_relative_time(profile.updated_at)),
        ]);
    }

    table.trim_fmt().to_string()
}

/// Render the collections of one connection.
///
/// # Example Output
///
/// ```text
/// COLLECTION   ITEMS   DIM   METRIC
/// docs         1,250   384   cosine
/// images          40     -   l2
/// ```
pub fn render_collections_table(collections: &[CollectionDescriptor]) -> String {
    if collections.is_empty() {
        return String::new();
    }

    let mut table = new_table(
        vec![
            Cell::new("COLLECTION"),
            Cell::new("ITEMS").set_alignment(CellAlignment::Right),
            Cell::new("DIM").set_alignment(CellAlignment::Right),
            Cell::new("METRIC"),
        ],
        vec![
            ColumnConstraint::LowerBoundary(Width::Fixed(10)),
            ColumnConstraint::LowerBoundary(Width::Fixed(6)),
            ColumnConstraint::LowerBoundary(Width::Fixed(4)),
            ColumnConstraint::LowerBoundary(Width::Fixed(6)),
        ],
    );

    for collection in collections {
        table.add_row(vec![
            Cell::new(truncate_str(&collection.name, 40)),
            Cell::new(or_dash(collection.item_count.map(format_thousands)))
                .set_alignment(CellAlignment::Right),
            Cell::new(or_dash(collection.dimension)).set_alignment(CellAlignment::Right),
            Cell::new(collection.metric.as_str()),
        ]);
    }

    table.trim_fmt().to_string()
}

/// Render the providers compiled into this build with their capabilities.
pub fn render_providers_table(providers: &[(ProviderKind, ProviderCapabilities)]) -> String {
    let mut table = new_table(
        vec![
            Cell::new("PROVIDER"),
            Cell::new("PERSISTENT"),
            Cell::new("CREATE"),
            Cell::new("DELETE"),
            Cell::new("INSERT-ONLY"),
            Cell::new("NAMESPACES"),
        ],
        vec![ColumnConstraint::LowerBoundary(Width::Fixed(9))],
    );

    let flag = |b: bool| if b { "yes" } else { "no" };
    for (kind, caps) in providers {
        table.add_row(vec![
            Cell::new(kind),
            Cell::new(flag(caps.persistent)),
            Cell::new(flag(caps.create_collection)),
            Cell::new(flag(caps.delete)),
            Cell::new(flag(caps.insert_only_writes)),
            Cell::new(flag(caps.namespaces)),
        ]);
    }

    table.trim_fmt().to_string()
}

/// Render which profiles have a readable secret.
pub fn render_secrets_table(rows: &[SecretRow]) -> String {
    if rows.is_empty() {
        return String::new();
    }

    let mut table = new_table(
        vec![Cell::new("PROFILE"), Cell::new("KEY"), Cell::new("STORED")],
        vec![
            ColumnConstraint::LowerBoundary(Width::Fixed(8)),
            ColumnConstraint::LowerBoundary(Width::Fixed(12)),
        ],
    );
    for row in rows {
        table.add_row(vec![
            Cell::new(truncate_str(&row.profile, 24)),
            Cell::new(&row.key),
            Cell::new(if row.present { "yes" } else { "missing" }),
        ]);
    }

    table.trim_fmt().to_string()
}

/// Render backup files found in a directory.
///
/// # Example Output
///
/// ```text
/// FILE                                 COLLECTION   ITEMS   FROM    CREATED
/// docs_backup_20260101_120000.jsonl    docs         1,250   local   2d ago
/// ```
pub fn render_backups_table(backups: &[BackupEntry]) -> String {
    if backups.is_empty() {
        return String::new();
    }

    let mut table = new_table(
        vec![
            Cell::new("FILE"),
            Cell::new("COLLECTION"),
            Cell::new("ITEMS").set_alignment(CellAlignment::Right),
            Cell::new("FROM"),
            Cell::new("CREATED"),
        ],
        vec![
            ColumnConstraint::UpperBoundary(Width::Fixed(48)),
            ColumnConstraint::LowerBoundary(Width::Fixed(10)),
            ColumnConstraint::LowerBoundary(Width::Fixed(6)),
        ],
    );
    for backup in backups {
        let file = backup
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(truncate_str(&file, 48)),
            Cell::new(truncate_str(&backup.header.collection.name, 24)),
            Cell::new(format_thousands(backup.header.item_count))
                .set_alignment(CellAlignment::Right),
            Cell::new(backup.header.provider),
            Cell::new(format_relative_time(backup.header.created_at)),
        ]);
    }

    table.trim_fmt().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vix_core::{BackupHeader, EndpointConfig, ProfileId};
    use vix_db::DistanceMetric;

    fn profile(name: &str) -> ConnectionProfile {
        let now = chrono::Utc::now();
        ConnectionProfile {
            id: ProfileId::from("0123456789abcdef"),
            name: name.to_string(),
            provider: ProviderKind::Local,
            endpoint: EndpointConfig::new().with("path", "/tmp/vix"),
            credential_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_profiles_table() {
        let output = render_profiles_table(&[profile("Local dev")]);
        assert!(output.contains("NAME"));
        assert!(output.contains("Local dev"));
        assert!(output.contains("path=/tmp/vix"));
        assert!(output.contains("01234567"));
        assert!(!output.contains("89abcdef"));
    }

    #[test]
    fn test_collections_table() {
        let collections = vec![
            CollectionDescriptor::new("docs")
                .with_count(1250)
                .with_dimension(384),
            CollectionDescriptor::new("images").with_metric(DistanceMetric::L2),
        ];
        let output = render_collections_table(&collections);
        assert!(output.contains("1,250"));
        assert!(output.contains("384"));
        assert!(output.contains("l2"));
    }

    #[test]
    fn test_backups_table() {
        let backup = BackupEntry {
            path: "/tmp/b/docs_backup_20260101_120000.jsonl".into(),
            header: BackupHeader {
                format_version: 1,
                collection: CollectionDescriptor::new("docs").with_dimension(3),
                provider: ProviderKind::Local,
                created_at: chrono::Utc::now(),
                item_count: 1250,
                include_vectors: true,
            },
            size_bytes: 4096,
        };
        let output = render_backups_table(&[backup]);
        assert!(output.contains("docs_backup_20260101_120000.jsonl"));
        assert!(!output.contains("/tmp/b"));
        assert!(output.contains("1,250"));
        assert!(output.contains("local"));
    }

    #[test]
    fn test_empty_tables() {
        assert!(render_profiles_table(&[]).is_empty());
        assert!(render_backups_table(&[]).is_empty());
        assert!(render_collections_table(&[]).is_empty());
        assert!(render_secrets_table(&[]).is_empty());
    }
}
