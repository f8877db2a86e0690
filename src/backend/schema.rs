use crate::types::Table;

pub const SCHEMA: &str = r#"
-- Profiles are keyed by the auth user id and owned by that user
CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY,
    full_name TEXT NOT NULL,
    bio TEXT,
    avatar_url TEXT,
    skills TEXT NOT NULL DEFAULT '[]',        -- JSON array
    interests TEXT NOT NULL DEFAULT '[]',     -- JSON array
    github_url TEXT,
    linkedin_url TEXT,
    portfolio_url TEXT,
    onboarding_completed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Projects have exactly one owning profile; profiles are referenced, not owned
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    creator_id TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    required_skills TEXT NOT NULL DEFAULT '[]',  -- JSON array, ordered
    team_size INTEGER NOT NULL CHECK (team_size >= 1),
    timeline TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'open'
        CHECK (status IN ('open', 'in_progress', 'completed')),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS project_applications (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    applicant_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'accepted', 'rejected')),
    message TEXT,
    portfolio_url TEXT,
    linkedin_url TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS project_members (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL,
    role TEXT NOT NULL CHECK (role IN ('creator', 'member')),
    joined_at TEXT NOT NULL,

    UNIQUE(project_id, user_id)
);

-- One room per application, created on first chat attempt
CREATE TABLE IF NOT EXISTS chat_rooms (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    application_id TEXT NOT NULL REFERENCES project_applications(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,

    UNIQUE(project_id, application_id)
);

-- Messages are immutable and owned by their room
CREATE TABLE IF NOT EXISTS chat_messages (
    id TEXT PRIMARY KEY,
    room_id TEXT NOT NULL REFERENCES chat_rooms(id) ON DELETE CASCADE,
    sender_id TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- At most one non-rejected application per applicant per project
CREATE UNIQUE INDEX IF NOT EXISTS idx_applications_active
    ON project_applications(project_id, applicant_id)
    WHERE status != 'rejected';

CREATE INDEX IF NOT EXISTS idx_projects_creator ON projects(creator_id);
CREATE INDEX IF NOT EXISTS idx_projects_status ON projects(status);
CREATE INDEX IF NOT EXISTS idx_applications_applicant ON project_applications(applicant_id);
CREATE INDEX IF NOT EXISTS idx_members_project ON project_members(project_id);
CREATE INDEX IF NOT EXISTS idx_messages_room ON chat_messages(room_id, created_at);
"#;

/// Column layout the local backend needs to map JSON rows onto SQLite.
pub(crate) struct TableDef {
    pub columns: &'static [&'static str],
    /// Columns holding JSON arrays serialized as text.
    pub json_columns: &'static [&'static str],
    /// Columns stored as 0/1 integers.
    pub bool_columns: &'static [&'static str],
    /// Timestamp columns filled on insert when absent.
    pub created_column: &'static str,
    pub has_updated_at: bool,
}

impl TableDef {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains(&name)
    }
}

pub(crate) fn table_def(table: Table) -> &'static TableDef {
    match table {
        Table::Profiles => &TableDef {
            columns: &[
                "id",
                "full_name",
                "bio",
                "avatar_url",
                "skills",
                "interests",
                "github_url",
                "linkedin_url",
                "portfolio_url",
                "onboarding_completed",
                "created_at",
                "updated_at",
            ],
            json_columns: &["skills", "interests"],
            bool_columns: &["onboarding_completed"],
            created_column: "created_at",
            has_updated_at: true,
        },
        Table::Projects => &TableDef {
            columns: &[
                "id",
                "creator_id",
                "title",
                "description",
                "required_skills",
                "team_size",
                "timeline",
                "status",
                "created_at",
                "updated_at",
            ],
            json_columns: &["required_skills"],
            bool_columns: &[],
            created_column: "created_at",
            has_updated_at: true,
        },
        Table::ProjectApplications => &TableDef {
            columns: &[
                "id",
                "project_id",
                "applicant_id",
                "status",
                "message",
                "portfolio_url",
                "linkedin_url",
                "created_at",
                "updated_at",
            ],
            json_columns: &[],
            bool_columns: &[],
            created_column: "created_at",
            has_updated_at: true,
        },
        Table::ProjectMembers => &TableDef {
            columns: &["id", "project_id", "user_id", "role", "joined_at"],
            json_columns: &[],
            bool_columns: &[],
            created_column: "joined_at",
            has_updated_at: false,
        },
        Table::ChatRooms => &TableDef {
            columns: &["id", "project_id", "application_id", "created_at"],
            json_columns: &[],
            bool_columns: &[],
            created_column: "created_at",
            has_updated_at: false,
        },
        Table::ChatMessages => &TableDef {
            columns: &["id", "room_id", "sender_id", "content", "created_at"],
            json_columns: &[],
            bool_columns: &[],
            created_column: "created_at",
            has_updated_at: false,
        },
    }
}
