//! Cookbook client - command line entry point.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cookbook_client::query::QueryKey;
use cookbook_client::storage::FileStorage;
use cookbook_client::{logging, AppContext, ClientConfig};
use cookbook_shared::{AuthError, AuthFlow, NetworkError, RecipeIngredient};

#[derive(Parser, Debug)]
#[command(author, version, about = "Browse cookbooks and recipes")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Create an account
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        name: String,
    },
    Logout,
    /// Show the signed-in user
    Whoami,
    Cookbooks,
    Cookbook { id: String },
    /// Recipes of one cookbook
    Recipes { cookbook_id: String },
    Recipe { id: String },
    Ingredients,
    Ingredient { id: String },
    Users,
    User { id: String },
}

const SIGN_IN_WAIT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let _ = dotenvy::dotenv();
    logging::init(logging::DEFAULT_FILTER);

    let args = Args::parse();
    let config = ClientConfig::from_env().context("loading configuration")?;
    let storage = FileStorage::default_location();
    let app = AppContext::firebase(config, storage).context("building HTTP client")?;

    let handle = app.start()?;
    app.session().wait_until_resolved().await;

    let code = run(&app, args.command).await;
    app.shutdown(handle);
    Ok(code)
}

async fn run(app: &AppContext, command: Command) -> ExitCode {
    match command {
        Command::Login { email, password } => {
            match app.session().sign_in(&email, &password).await {
                Ok(_) => report_signed_in(app).await,
                Err(e) => auth_failure(&e, AuthFlow::SignIn),
            }
        }
        Command::Register {
            email,
            password,
            name,
        } => match app.session().sign_up(&email, &password, &name).await {
            Ok(_) => report_signed_in(app).await,
            Err(e) => auth_failure(&e, AuthFlow::SignUp),
        },
        Command::Logout => match app.sign_out().await {
            Ok(()) => {
                println!("Signed out");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Sign out failed, please try again ({e})");
                ExitCode::FAILURE
            }
        },
        Command::Whoami => {
            match app.session().user() {
                Some(user) => {
                    println!("{}", user.name().unwrap_or(user.id.as_str()));
                    if let Some(email) = &user.email {
                        println!("  email: {email}");
                    }
                    if let Some(at) = user.profile.created_at {
                        println!("  member since: {}", at.format("%Y-%m-%d"));
                    }
                    if let Some(at) = user.profile.last_login {
                        println!("  last login: {}", at.format("%Y-%m-%d %H:%M"));
                    }
                }
                None => println!("Not signed in"),
            }
            ExitCode::SUCCESS
        }
        Command::Cookbooks => {
            let key = QueryKey::cookbooks();
            show(&key, app.resources().load_cookbooks().await, |cookbooks| {
                for cookbook in cookbooks.iter() {
                    let count = cookbook
                        .recipe_count
                        .map(|n| format!(" ({n} recipes)"))
                        .unwrap_or_default();
                    println!("{:>6}  {}{count}", cookbook.id, cookbook.title);
                }
            })
        }
        Command::Cookbook { id } => {
            let key = QueryKey::cookbook(id.as_str());
            show(&key, app.resources().load_cookbook(&id).await, |cookbook| {
                println!("{}", cookbook.title);
                if let Some(description) = &cookbook.description {
                    println!("\n{description}");
                }
            })
        }
        Command::Recipes { cookbook_id } => {
            let key = QueryKey::recipes_by_cookbook(cookbook_id.as_str());
            let result = app.resources().load_recipes_by_cookbook(&cookbook_id).await;
            show(&key, result, |recipes| {
                if recipes.is_empty() {
                    println!("No recipes in this cookbook yet");
                }
                for recipe in recipes.iter() {
                    println!("{:>6}  {}", recipe.id, recipe.title);
                }
            })
        }
        Command::Recipe { id } => {
            let key = QueryKey::recipe(id.as_str());
            show(&key, app.resources().load_recipe(&id).await, |recipe| {
                println!("{}\n", recipe.title);
                println!("Ingredients:");
                let lines: Vec<String> = if recipe.recipe_ingredients.is_empty() {
                    recipe.ingredients.clone()
                } else {
                    recipe
                        .recipe_ingredients
                        .iter()
                        .map(RecipeIngredient::display_line)
                        .collect()
                };
                for line in lines {
                    println!("  - {line}");
                }
                if let Some(instructions) = &recipe.instructions {
                    println!("\nInstructions:\n{instructions}");
                }
            })
        }
        Command::Ingredients => {
            let key = QueryKey::ingredients();
            show(&key, app.resources().load_ingredients().await, |ingredients| {
                for ingredient in ingredients.iter() {
                    println!("{:>6}  {}", ingredient.id, ingredient.name);
                }
            })
        }
        Command::Ingredient { id } => {
            let key = QueryKey::ingredient(id.as_str());
            show(&key, app.resources().load_ingredient(&id).await, |ingredient| {
                println!("{}", ingredient.name);
                if let Some(category) = &ingredient.category {
                    println!("  category: {category}");
                }
            })
        }
        Command::Users => {
            let key = QueryKey::users();
            show(&key, app.resources().load_users().await, |users| {
                for user in users.iter() {
                    let name = user
                        .display_name
                        .as_deref()
                        .or(user.name.as_deref())
                        .unwrap_or("-");
                    println!("{:>6}  {name}", user.id);
                }
            })
        }
        Command::User { id } => {
            let key = QueryKey::user(id.as_str());
            show(&key, app.resources().load_user(&id).await, |user| {
                println!("{}", user.display_name.as_deref().or(user.name.as_deref()).unwrap_or("-"));
                if let Some(email) = &user.email {
                    println!("  email: {email}");
                }
            })
        }
    }
}

/// Wait for the provider to report the new session, then greet the user.
async fn report_signed_in(app: &AppContext) -> ExitCode {
    let mut rx = app.session().subscribe();
    let session = tokio::time::timeout(SIGN_IN_WAIT, rx.wait_for(|s| s.is_authenticated())).await;
    match session {
        Ok(Ok(session)) => {
            let name = session
                .user()
                .and_then(|u| u.name().map(str::to_string))
                .unwrap_or_default();
            println!("Signed in as {name}");
        }
        _ => println!("Signed in"),
    }
    ExitCode::SUCCESS
}

fn auth_failure(error: &AuthError, flow: AuthFlow) -> ExitCode {
    tracing::debug!("authentication failed: {error}");
    eprintln!("{}", error.user_message(flow));
    ExitCode::FAILURE
}

fn show<T>(key: &QueryKey, result: Result<T, NetworkError>, print: impl FnOnce(T)) -> ExitCode {
    match result {
        Ok(value) => {
            print(value);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::debug!(%key, "request failed: {}", e.message());
            eprintln!("{}", e.user_message(key.describe()));
            ExitCode::FAILURE
        }
    }
}
