use clap::{Parser, Subcommand};
use notes_hub_core::{HubConfig, RequestContext, UpdateDocument};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "notes-hub")]
#[command(about = "Hierarchical per-user document store")]
pub struct Cli {
    /// Directory holding document records (overrides NOTES_HUB_DATA_DIR)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Directory holding the propagation journal (overrides NOTES_HUB_JOURNAL_DIR)
    #[arg(long, global = true)]
    pub journal_dir: Option<PathBuf>,

    /// Act as this user when no token secret is configured
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// Bearer token, verified with NOTES_HUB_JWT_SECRET
    #[arg(short, long, global = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Create a document
    Create {
        #[arg(default_value = "Untitled")]
        title: String,
        /// Nest the new document under this parent
        #[arg(long)]
        parent: Option<Uuid>,
    },
    /// List every document in the store
    List,
    /// List unarchived children of a parent, or the roots
    Sidebar {
        #[arg(long)]
        parent: Option<Uuid>,
    },
    /// List archived documents
    Trash,
    /// List all unarchived documents
    Search,
    /// Show a single document
    Show { id: Uuid },
    /// Update selected fields of a document
    Update {
        id: Uuid,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        cover_image: Option<String>,
        #[arg(long)]
        icon: Option<String>,
        #[arg(long)]
        published: Option<bool>,
    },
    /// Clear a document's icon
    RemoveIcon { id: Uuid },
    /// Permanently delete one document (children are kept)
    Remove { id: Uuid },
    /// Archive a document and its subtree
    Archive { id: Uuid },
    /// Restore a document and its subtree
    Restore { id: Uuid },
}

impl Cli {
    pub fn apply_overrides(&self, config: &mut HubConfig) {
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(dir) = &self.journal_dir {
            config.journal_dir = dir.clone();
        }
    }

    pub fn request_context(&self) -> RequestContext {
        RequestContext {
            bearer_token: self.token.clone(),
            user_id: self.user.clone(),
        }
    }
}

impl Commands {
    /// Field updates carried by `update`, if this is one.
    pub fn update_fields(&self) -> Option<UpdateDocument> {
        match self {
            Commands::Update {
                title,
                content,
                cover_image,
                icon,
                published,
                ..
            } => Some(UpdateDocument {
                title: title.clone(),
                content: content.clone(),
                cover_image: cover_image.clone(),
                icon: icon.clone(),
                is_published: *published,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn create_defaults_to_untitled() {
        let cli = Cli::try_parse_from(["notes-hub", "--user", "alice", "create"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Create {
                title: "Untitled".to_string(),
                parent: None
            }
        );
        assert_eq!(cli.request_context().user_id.as_deref(), Some("alice"));
    }

    #[test]
    fn global_flags_after_subcommand() {
        let parent = Uuid::new_v4();
        let parent_arg = parent.to_string();
        let cli = Cli::try_parse_from([
            "notes-hub",
            "sidebar",
            "--parent",
            parent_arg.as_str(),
            "--data-dir",
            "/tmp/notes",
        ])
        .unwrap();
        assert_eq!(cli.command, Commands::Sidebar { parent: Some(parent) });

        let mut config = HubConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/notes"));
        assert_eq!(config.journal_dir, PathBuf::from("journal"));
    }

    #[test]
    fn update_collects_fields() {
        let id = Uuid::new_v4().to_string();
        let cli = Cli::try_parse_from([
            "notes-hub",
            "update",
            id.as_str(),
            "--title",
            "Renamed",
            "--published",
            "true",
        ])
        .unwrap();
        let fields = cli.command.update_fields().unwrap();
        assert_eq!(fields.title.as_deref(), Some("Renamed"));
        assert_eq!(fields.is_published, Some(true));
        assert!(fields.icon.is_none());
        assert!(Commands::List.update_fields().is_none());
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(Cli::try_parse_from(["notes-hub", "archive", "not-a-uuid"]).is_err());
    }
}
