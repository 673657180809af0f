use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the vitrine binary.
#[derive(Debug, Parser)]
#[command(
    name = "vitrine",
    version,
    about = "Storefront API client with cached queries and token refresh"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "VITRINE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(flatten)]
    pub credentials: Credentials,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the API base URL.
    #[arg(long = "base-url", value_name = "URL", global = true)]
    pub base_url: Option<String>,

    /// Override the request timeout in milliseconds.
    #[arg(long = "request-timeout-ms", value_name = "MILLIS", global = true)]
    pub request_timeout_ms: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Force JSON log output.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

/// Account used by commands that need a session.
#[derive(Debug, Args, Default, Clone)]
pub struct Credentials {
    #[arg(long, env = "VITRINE_EMAIL", value_name = "EMAIL", global = true)]
    pub email: Option<String>,

    #[arg(
        long,
        env = "VITRINE_PASSWORD",
        value_name = "PASSWORD",
        hide_env_values = true,
        global = true
    )]
    pub password: Option<String>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Browse and inspect products.
    #[command(subcommand)]
    Products(ProductsCommand),
    /// Browse and manage categories.
    #[command(subcommand)]
    Categories(CategoriesCommand),
    /// Inspect and moderate user accounts.
    #[command(subcommand)]
    Users(UsersCommand),
    /// Read and post product ratings.
    #[command(subcommand)]
    Ratings(RatingsCommand),
    /// Show the identity of the signed-in account.
    Whoami,
}

#[derive(Debug, Subcommand, Clone)]
pub enum ProductsCommand {
    /// List storefront products, following pages up to --pages.
    List(ProductListArgs),
    /// Show one product.
    Show {
        id: i64,
    },
}

#[derive(Debug, Args, Clone, Default)]
pub struct ProductListArgs {
    /// Name search.
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long = "min-price")]
    pub min_price: Option<f64>,
    #[arg(long = "max-price")]
    pub max_price: Option<f64>,
    /// Restrict to these categories; repeatable.
    #[arg(long = "category")]
    pub category_ids: Vec<i64>,
    #[arg(long = "sort-by")]
    pub sort_by: Option<String>,
    /// asc or desc.
    #[arg(long = "sort-order")]
    pub sort_order: Option<String>,
    #[arg(long)]
    pub size: Option<u32>,
    /// Number of pages to load.
    #[arg(long, default_value_t = 1)]
    pub pages: u32,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CategoriesCommand {
    /// List categories.
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 12)]
        size: u32,
    },
    /// Show one category.
    Show { id: i64 },
    /// Create a category with a thumbnail image.
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: String,
        /// Thumbnail image (jpg, png or webp).
        #[arg(long, value_hint = ValueHint::FilePath)]
        thumbnail: PathBuf,
    },
    /// Delete a category.
    Delete { id: i64 },
}

#[derive(Debug, Subcommand, Clone)]
pub enum UsersCommand {
    /// Show one user.
    Show { id: i64 },
    /// Activate or deactivate a user.
    #[command(name = "set-active")]
    SetActive {
        id: i64,
        #[arg(value_parser = BoolishValueParser::new(), action = clap::ArgAction::Set)]
        active: bool,
    },
}

#[derive(Debug, Subcommand, Clone)]
pub enum RatingsCommand {
    /// List ratings of a product.
    List {
        #[arg(long = "product")]
        product_id: i64,
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Rate a product.
    Create {
        #[arg(long = "product")]
        product_id: i64,
        #[arg(long)]
        stars: u8,
        #[arg(long)]
        comment: Option<String>,
    },
}
