use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use thread_kernel_api::{
    AddAccountRequest, AddFilterRequest, AddStatusRequest, CancellationToken, ThreadKernelApi,
};
use thread_kernel_core::{
    AccountId, Block, FilterAction, FilterContext, FilterKeyword, Follow, InteractionPolicy,
    StatusId, UserMute, Visibility,
};
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "tk")]
#[command(about = "Thread Kernel CLI")]
struct Cli {
    #[arg(long, default_value = "./thread_kernel.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: Box<DbCommand>,
    },
    Account {
        #[command(subcommand)]
        command: Box<AccountCommand>,
    },
    Follow {
        #[command(subcommand)]
        command: Box<EdgeCommand>,
    },
    Block {
        #[command(subcommand)]
        command: Box<EdgeCommand>,
    },
    Mute {
        #[command(subcommand)]
        command: Box<MuteCommand>,
    },
    Filter {
        #[command(subcommand)]
        command: Box<FilterCommand>,
    },
    Status {
        #[command(subcommand)]
        command: Box<StatusCommand>,
    },
    Context {
        #[command(subcommand)]
        command: Box<ContextCommand>,
    },
    Policy {
        #[command(subcommand)]
        command: Box<PolicyCommand>,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum AccountCommand {
    Add(AccountAddArgs),
}

#[derive(Debug, Args)]
struct AccountAddArgs {
    #[arg(long)]
    id: Option<String>,
    #[arg(long)]
    username: String,
}

#[derive(Debug, Subcommand)]
enum EdgeCommand {
    Add(EdgeAddArgs),
}

#[derive(Debug, Args)]
struct EdgeAddArgs {
    #[arg(long)]
    account: String,
    #[arg(long)]
    target: String,
}

#[derive(Debug, Subcommand)]
enum MuteCommand {
    Add(MuteAddArgs),
}

#[derive(Debug, Args)]
struct MuteAddArgs {
    #[arg(long)]
    account: String,
    #[arg(long)]
    target: String,
    #[arg(long)]
    expires_at: Option<String>,
}

#[derive(Debug, Subcommand)]
enum FilterCommand {
    Add(FilterAddArgs),
}

#[derive(Debug, Args)]
struct FilterAddArgs {
    #[arg(long)]
    id: Option<String>,
    #[arg(long)]
    account: String,
    #[arg(long)]
    title: String,
    /// Substring keyword; repeat for several.
    #[arg(long = "keyword")]
    keywords: Vec<String>,
    /// Keyword that only matches on word boundaries; repeat for several.
    #[arg(long = "whole-word")]
    whole_words: Vec<String>,
    #[arg(long = "context", value_enum, required = true)]
    contexts: Vec<FilterContextArg>,
    #[arg(long, value_enum, default_value = "warn")]
    action: FilterActionArg,
    #[arg(long)]
    expires_at: Option<String>,
}

#[derive(Debug, Subcommand)]
enum StatusCommand {
    Add(StatusAddArgs),
    Get(StatusGetArgs),
    Source(StatusSourceArgs),
    History(StatusGetArgs),
}

#[derive(Debug, Args)]
struct StatusAddArgs {
    #[arg(long)]
    id: Option<String>,
    #[arg(long)]
    account: String,
    #[arg(long)]
    in_reply_to: Option<String>,
    #[arg(long)]
    boost_of: Option<String>,
    #[arg(long, value_enum, default_value = "public")]
    visibility: VisibilityArg,
    #[arg(long, default_value = "")]
    content: String,
    #[arg(long, default_value = "")]
    spoiler_text: String,
    #[arg(long, default_value_t = false)]
    sensitive: bool,
    #[arg(long = "mention")]
    mentions: Vec<String>,
    #[arg(long)]
    created_at: Option<String>,
    /// Interaction policy as JSON; omitted means the visibility default.
    #[arg(long)]
    interaction_policy_json: Option<String>,
}

#[derive(Debug, Args)]
struct StatusGetArgs {
    #[arg(long)]
    status_id: String,
    #[arg(long)]
    requester: Option<String>,
}

#[derive(Debug, Args)]
struct StatusSourceArgs {
    #[arg(long)]
    status_id: String,
    #[arg(long)]
    requester: String,
}

#[derive(Debug, Subcommand)]
enum ContextCommand {
    /// Thread context personalized for a requester, or anonymous when omitted.
    Get(StatusGetArgs),
    /// Thread context as an anonymous web viewer sees it.
    Web(ContextWebArgs),
}

#[derive(Debug, Args)]
struct ContextWebArgs {
    #[arg(long)]
    status_id: String,
}

#[derive(Debug, Subcommand)]
enum PolicyCommand {
    Default(PolicyDefaultArgs),
}

#[derive(Debug, Args)]
struct PolicyDefaultArgs {
    #[arg(value_enum)]
    visibility: VisibilityArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VisibilityArg {
    Public,
    Unlocked,
    FollowersOnly,
    MutualsOnly,
    Direct,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FilterContextArg {
    Home,
    Notifications,
    Public,
    Thread,
    Account,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FilterActionArg {
    Warn,
    Hide,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn emit<T: Serialize>(value: &T, what: &str) -> Result<()> {
    emit_json(serde_json::to_value(value).with_context(|| format!("failed to serialize {what}"))?)
}

// Logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let api = ThreadKernelApi::new(cli.db);
    match cli.command {
        Command::Db { command } => run_db(*command, &api),
        Command::Account { command } => run_account(*command, &api),
        Command::Follow { command } => run_follow(*command, &api),
        Command::Block { command } => run_block(*command, &api),
        Command::Mute { command } => run_mute(*command, &api),
        Command::Filter { command } => run_filter(*command, &api),
        Command::Status { command } => run_status(*command, &api),
        Command::Context { command } => run_context(*command, &api),
        Command::Policy { command } => run_policy(*command, &api),
    }
}

fn run_db(command: DbCommand, api: &ThreadKernelApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => emit(&api.migrate(args.dry_run)?, "migration result"),
        DbCommand::IntegrityCheck => {
            let report = api.integrity_check()?;
            let healthy = report.quick_check_ok && report.foreign_key_violations.is_empty();
            emit(&report, "integrity report")?;
            if !healthy {
                return Err(anyhow!("integrity check failed"));
            }
            Ok(())
        }
    }
}

fn run_account(command: AccountCommand, api: &ThreadKernelApi) -> Result<()> {
    match command {
        AccountCommand::Add(args) => {
            let account = api.add_account(AddAccountRequest {
                id: args.id.as_deref().map(AccountId::from),
                username: args.username,
            })?;
            emit(&account, "account")
        }
    }
}

fn run_follow(command: EdgeCommand, api: &ThreadKernelApi) -> Result<()> {
    match command {
        EdgeCommand::Add(args) => {
            let follow = api.add_follow(Follow {
                account_id: AccountId::from(args.account.as_str()),
                target_account_id: AccountId::from(args.target.as_str()),
            })?;
            emit(&follow, "follow")
        }
    }
}

fn run_block(command: EdgeCommand, api: &ThreadKernelApi) -> Result<()> {
    match command {
        EdgeCommand::Add(args) => {
            let block = api.add_block(Block {
                account_id: AccountId::from(args.account.as_str()),
                target_account_id: AccountId::from(args.target.as_str()),
            })?;
            emit(&block, "block")
        }
    }
}

fn run_mute(command: MuteCommand, api: &ThreadKernelApi) -> Result<()> {
    match command {
        MuteCommand::Add(args) => {
            let mute = api.add_mute(UserMute {
                account_id: AccountId::from(args.account.as_str()),
                target_account_id: AccountId::from(args.target.as_str()),
                expires_at: parse_optional_rfc3339(args.expires_at.as_deref())?,
            })?;
            emit(&mute, "mute")
        }
    }
}

fn run_filter(command: FilterCommand, api: &ThreadKernelApi) -> Result<()> {
    match command {
        FilterCommand::Add(args) => {
            let keywords = args
                .keywords
                .into_iter()
                .map(|keyword| FilterKeyword { keyword, whole_word: false })
                .chain(
                    args.whole_words
                        .into_iter()
                        .map(|keyword| FilterKeyword { keyword, whole_word: true }),
                )
                .collect::<Vec<_>>();
            if keywords.is_empty() {
                return Err(anyhow!("filter needs at least one --keyword or --whole-word"));
            }

            let filter = api.add_filter(AddFilterRequest {
                id: args.id,
                account_id: AccountId::from(args.account.as_str()),
                title: args.title,
                keywords,
                contexts: args.contexts.into_iter().map(FilterContextArg::into_context).collect(),
                action: args.action.into_action(),
                expires_at: parse_optional_rfc3339(args.expires_at.as_deref())?,
            })?;
            emit(&filter, "filter")
        }
    }
}

fn run_status(command: StatusCommand, api: &ThreadKernelApi) -> Result<()> {
    match command {
        StatusCommand::Add(args) => {
            let interaction_policy = match args.interaction_policy_json.as_deref() {
                Some(raw) => Some(
                    serde_json::from_str::<InteractionPolicy>(raw)
                        .context("invalid --interaction-policy-json")?,
                ),
                None => None,
            };
            let status = api.add_status(AddStatusRequest {
                id: args.id.as_deref().map(StatusId::from),
                account_id: AccountId::from(args.account.as_str()),
                in_reply_to_id: args.in_reply_to.as_deref().map(StatusId::from),
                boost_of_id: args.boost_of.as_deref().map(StatusId::from),
                visibility: args.visibility.into_visibility(),
                content: args.content,
                spoiler_text: args.spoiler_text,
                sensitive: args.sensitive,
                mentions: args.mentions.iter().map(|raw| AccountId::from(raw.as_str())).collect(),
                created_at: parse_optional_rfc3339(args.created_at.as_deref())?,
                interaction_policy,
            })?;
            emit(&status, "status")
        }
        StatusCommand::Get(args) => {
            let requester = args.requester.as_deref().map(AccountId::from);
            let view = api.get_status(requester.as_ref(), &StatusId::from(args.status_id.as_str()))?;
            emit(&view, "status")
        }
        StatusCommand::Source(args) => {
            let source = api.get_status_source(
                &AccountId::from(args.requester.as_str()),
                &StatusId::from(args.status_id.as_str()),
            )?;
            emit(&source, "status source")
        }
        StatusCommand::History(args) => {
            let requester = args.requester.as_deref().map(AccountId::from);
            let history = api
                .get_status_history(requester.as_ref(), &StatusId::from(args.status_id.as_str()))?;
            emit_json(serde_json::json!({
                "status_id": args.status_id,
                "edits": serde_json::to_value(&history).context("failed to serialize history")?
            }))
        }
    }
}

// A one-shot command is never cancelled; interrupting the process ends it.
fn run_context(command: ContextCommand, api: &ThreadKernelApi) -> Result<()> {
    let cancel = CancellationToken::new();
    match command {
        ContextCommand::Get(args) => {
            let requester = args.requester.as_deref().map(AccountId::from);
            let context = api.get_context(
                requester.as_ref(),
                &StatusId::from(args.status_id.as_str()),
                &cancel,
            )?;
            emit(&context, "context")
        }
        ContextCommand::Web(args) => {
            let context = api.get_web_context(&StatusId::from(args.status_id.as_str()), &cancel)?;
            emit(&context, "context")
        }
    }
}

fn run_policy(command: PolicyCommand, api: &ThreadKernelApi) -> Result<()> {
    match command {
        PolicyCommand::Default(args) => {
            emit(&api.default_policy(args.visibility.into_visibility()), "policy report")
        }
    }
}

fn parse_optional_rfc3339(value: Option<&str>) -> Result<Option<OffsetDateTime>> {
    value.map(parse_rfc3339).transpose()
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 UTC timestamp: {value}"))?;

    if parsed.offset() != time::UtcOffset::UTC {
        return Err(anyhow!("timestamp MUST use UTC offset Z (received: {value})"));
    }

    Ok(parsed)
}

impl VisibilityArg {
    fn into_visibility(self) -> Visibility {
        match self {
            Self::Public => Visibility::Public,
            Self::Unlocked => Visibility::Unlocked,
            Self::FollowersOnly => Visibility::FollowersOnly,
            Self::MutualsOnly => Visibility::MutualsOnly,
            Self::Direct => Visibility::Direct,
        }
    }
}

impl FilterContextArg {
    fn into_context(self) -> FilterContext {
        match self {
            Self::Home => FilterContext::Home,
            Self::Notifications => FilterContext::Notifications,
            Self::Public => FilterContext::Public,
            Self::Thread => FilterContext::Thread,
            Self::Account => FilterContext::Account,
        }
    }
}

impl FilterActionArg {
    fn into_action(self) -> FilterAction {
        match self {
            Self::Warn => FilterAction::Warn,
            Self::Hide => FilterAction::Hide,
        }
    }
}
