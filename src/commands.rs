//! Command handlers for the `vitrine` binary. Output is pretty JSON on stdout.

use std::fs;
use std::path::Path;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};
use vitrine::{
    Storefront,
    api::{NewCategory, categories::PageWindow},
    cache::{FetchNext, InfiniteData, Paginated},
    config::{
        CategoriesCommand, CliArgs, Command, Credentials, ProductListArgs, ProductsCommand,
        RatingsCommand, UsersCommand,
    },
    error::AppError,
    session::Identity,
    transport::FilePart,
};
use vitrine_api_types::{
    CreateRatingDto, LoginInput, PaginationResponse, ProductFilter, SortOrder,
};

pub async fn dispatch(storefront: &Storefront, cli: &CliArgs) -> Result<(), AppError> {
    match &cli.command {
        Command::Products(command) => products(storefront, command).await,
        Command::Categories(command) => categories(storefront, &cli.credentials, command).await,
        Command::Users(command) => users(storefront, &cli.credentials, command).await,
        Command::Ratings(command) => ratings(storefront, &cli.credentials, command).await,
        Command::Whoami => {
            let identity = sign_in(storefront, &cli.credentials).await?;
            print_json(&identity_json(&identity))
        }
    }
}

/// Log in with explicit credentials, or use the session resumed at startup.
async fn sign_in(storefront: &Storefront, credentials: &Credentials) -> Result<Identity, AppError> {
    if let (Some(email), Some(password)) = (&credentials.email, &credentials.password) {
        let identity = storefront
            .login(&LoginInput {
                email: email.clone(),
                password: password.clone(),
            })
            .await?;
        info!(user = %identity.username, "signed in");
        return Ok(identity);
    }
    // Startup already tried the refresh cookie.
    storefront.session().identity().ok_or_else(|| {
        AppError::validation("this command needs --email and --password (or VITRINE_EMAIL / VITRINE_PASSWORD)")
    })
}

fn identity_json(identity: &Identity) -> serde_json::Value {
    json!({
        "id": identity.id,
        "username": identity.username,
        "roles": identity.roles,
    })
}

// ============================================================================
// Products
// ============================================================================

async fn products(storefront: &Storefront, command: &ProductsCommand) -> Result<(), AppError> {
    match command {
        ProductsCommand::List(args) => {
            let filter = product_filter(args)?;
            let mut handle = storefront.use_products(&filter)?;
            let mut data = handle.settled().await.into_result()?;
            while (data.pages.len() as u32) < args.pages {
                match handle.fetch_next().await? {
                    FetchNext::Fetched => data = handle.state().into_result()?,
                    FetchNext::Exhausted | FetchNext::Ignored => break,
                }
            }
            print_json(&flatten(&data))
        }
        ProductsCommand::Show { id } => print_json(storefront.product(*id).await?.as_ref()),
    }
}

fn product_filter(args: &ProductListArgs) -> Result<ProductFilter, AppError> {
    let sort_order = match args.sort_order.as_deref() {
        None => None,
        Some("asc") => Some(SortOrder::Asc),
        Some("desc") => Some(SortOrder::Desc),
        Some(other) => {
            return Err(AppError::validation(format!(
                "--sort-order must be asc or desc, got `{other}`"
            )));
        }
    };
    Ok(ProductFilter {
        name: args.name.clone(),
        min_price: args.min_price,
        max_price: args.max_price,
        category_ids: args.category_ids.clone(),
        sort_by: args.sort_by.clone(),
        sort_order,
        page: None,
        size: args.size,
    })
}

/// Loaded pages as one listing.
fn flatten<T: Serialize>(data: &InfiniteData<PaginationResponse<T>>) -> serde_json::Value {
    let total = data.pages.first().map_or(0, |page| page.total);
    let last_page = data.last_page().map_or(0, Paginated::page);
    json!({
        "total": total,
        "pagesLoaded": data.pages.len(),
        "lastPage": last_page,
        "hasMore": data.has_next_page(),
        "data": data.items().collect::<Vec<_>>(),
    })
}

// ============================================================================
// Categories
// ============================================================================

async fn categories(
    storefront: &Storefront,
    credentials: &Credentials,
    command: &CategoriesCommand,
) -> Result<(), AppError> {
    match command {
        CategoriesCommand::List { page, size } => {
            let categories = storefront
                .categories(PageWindow {
                    page: *page,
                    size: *size,
                })
                .await?;
            print_json(categories.as_ref())
        }
        CategoriesCommand::Show { id } => print_json(storefront.category(*id).await?.as_ref()),
        CategoriesCommand::Create {
            name,
            description,
            thumbnail,
        } => {
            let input = NewCategory {
                name: name.clone(),
                description: description.clone(),
                thumbnail: read_image("thumbnailImg", thumbnail)?,
            };
            sign_in(storefront, credentials).await?;
            storefront.create_category(input).await?;
            print_json(&json!({ "created": name }))
        }
        CategoriesCommand::Delete { id } => {
            sign_in(storefront, credentials).await?;
            storefront.delete_category(*id).await?;
            print_json(&json!({ "deleted": id }))
        }
    }
}

fn read_image(field: &str, path: &Path) -> Result<FilePart, AppError> {
    let bytes = fs::read(path).map_err(|err| {
        AppError::validation(format!("failed to read `{}`: {err}", path.display()))
    })?;
    let content_type = match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg" | "jpeg") => Some("image/jpeg".to_string()),
        Some("png") => Some("image/png".to_string()),
        Some("webp") => Some("image/webp".to_string()),
        _ => None,
    };
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    debug!(file = %file_name, bytes = bytes.len(), "read image");
    Ok(FilePart {
        field: field.to_string(),
        file_name,
        content_type,
        bytes,
    })
}

// ============================================================================
// Users
// ============================================================================

async fn users(
    storefront: &Storefront,
    credentials: &Credentials,
    command: &UsersCommand,
) -> Result<(), AppError> {
    sign_in(storefront, credentials).await?;
    match command {
        UsersCommand::Show { id } => print_json(storefront.user(*id).await?.as_ref()),
        UsersCommand::SetActive { id, active } => {
            storefront.set_user_active(*id, *active).await?;
            print_json(storefront.user(*id).await?.as_ref())
        }
    }
}

// ============================================================================
// Ratings
// ============================================================================

async fn ratings(
    storefront: &Storefront,
    credentials: &Credentials,
    command: &RatingsCommand,
) -> Result<(), AppError> {
    match command {
        RatingsCommand::List { product_id, pages } => {
            let mut handle = storefront.use_ratings(*product_id)?;
            let mut data = handle.settled().await.into_result()?;
            while (data.pages.len() as u32) < *pages {
                match handle.fetch_next().await? {
                    FetchNext::Fetched => data = handle.state().into_result()?,
                    FetchNext::Exhausted | FetchNext::Ignored => break,
                }
            }
            print_json(&flatten(&data))
        }
        RatingsCommand::Create {
            product_id,
            stars,
            comment,
        } => {
            sign_in(storefront, credentials).await?;
            storefront
                .create_rating(CreateRatingDto {
                    product_id: *product_id,
                    stars: *stars,
                    comment: comment.clone(),
                })
                .await?;
            print_json(&json!({ "rated": product_id, "stars": stars }))
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{out}");
    Ok(())
}
