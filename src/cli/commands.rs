use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with email and password
    Login {
        /// Account email
        #[arg(long)]
        email: Option<String>,

        /// Read the password from the first line of stdin
        #[arg(long)]
        password_stdin: bool,
    },

    /// Sign out and forget the stored session
    Logout,

    /// Show the signed-in user
    Whoami,

    /// List open projects looking for teammates
    Feed {
        /// Keep running and print projects as they appear
        #[arg(long)]
        follow: bool,
    },

    /// List applications you sent and applications to your projects
    Applications,

    /// Apply to a project
    Apply {
        /// Project ID
        project_id: String,

        /// Short note to the project creator
        #[arg(long)]
        message: Option<String>,

        #[arg(long)]
        portfolio_url: Option<String>,

        #[arg(long)]
        linkedin_url: Option<String>,
    },

    /// Accept an application to one of your projects
    Accept {
        /// Application ID
        application_id: String,
    },

    /// Reject an application to one of your projects
    Reject {
        /// Application ID
        application_id: String,
    },

    /// Show or write to the chat for an application
    Chat {
        /// Project ID
        project_id: String,

        /// Application ID
        application_id: String,

        /// Send this message before printing the conversation
        #[arg(long, short)]
        send: Option<String>,

        /// Keep running and print new messages as they arrive
        #[arg(long)]
        follow: bool,
    },
}
