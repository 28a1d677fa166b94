//! ALFA Media Vault - CLI
//!
//! Command-line interface over the media store.

use std::path::PathBuf;
use clap::{Parser, Subcommand};

use alfa_media_vault::config::CONFIG_FILE;
use alfa_media_vault::{
    Album, CleartextMedia, EncryptedMedia, Key, LoadDestination, MediaSource, MediaStore, StorageOption, StoreConfig, VaultError,
    VaultResult,
};

#[derive(Parser)]
#[command(name = "alfa-media")]
#[command(author = "Karen Tonoyan")]
#[command(version = alfa_media_vault::VERSION)]
#[command(about = "ALFA Media Vault - Encrypted albums with key management")]
struct Cli {
    /// Config file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// App password, required once one is set
    #[arg(short, long, global = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init,

    /// Generate a key
    Keygen {
        /// Key name
        name: String,

        /// Derive from these passphrase words instead of random bytes
        #[arg(long, num_args = 1..)]
        words: Option<Vec<String>>,
    },

    /// List keys
    Keys,

    /// Import a serialized key
    ImportKey {
        /// Base64 key string
        serialized: String,
    },

    /// Print a key in its serialized form
    ExportKey {
        /// Key name
        name: String,
    },

    /// Delete a key
    DeleteKey {
        /// Key name
        name: String,
    },

    /// Make a key current
    SetCurrent {
        /// Key name
        name: String,
    },

    /// Write every key to a backup document
    Backup {
        /// Output path
        output: PathBuf,
    },

    /// Import keys from a backup document
    Restore {
        /// Backup path
        input: PathBuf,
    },

    /// Set or change the app password
    SetPassword {
        /// New password
        new: String,
    },

    /// List albums readable with a key
    Albums {
        /// Key name (defaults to current)
        #[arg(short, long)]
        key: Option<String>,

        /// Remote storage
        #[arg(long)]
        remote: bool,
    },

    /// Encrypt a file into an album
    Save {
        /// File path
        path: PathBuf,

        /// Album name
        #[arg(short, long)]
        album: String,

        #[arg(short, long)]
        key: Option<String>,

        #[arg(long)]
        remote: bool,
    },

    /// List media in an album
    List {
        album: String,

        #[arg(short, long)]
        key: Option<String>,

        #[arg(long)]
        remote: bool,
    },

    /// Decrypt a media item to a file
    Export {
        album: String,

        /// Media ID
        id: String,

        /// Output path
        output: PathBuf,

        #[arg(short, long)]
        key: Option<String>,

        #[arg(long)]
        remote: bool,
    },

    /// Delete media items
    Delete {
        album: String,

        /// Media IDs
        #[arg(required = true)]
        ids: Vec<String>,

        #[arg(short, long)]
        key: Option<String>,

        #[arg(long)]
        remote: bool,
    },

    /// Move media items to another album
    Move {
        from: String,

        to: String,

        #[arg(required = true)]
        ids: Vec<String>,

        /// Key of the source album
        #[arg(short, long)]
        key: Option<String>,

        /// Key of the destination album (defaults to the source key)
        #[arg(long)]
        to_key: Option<String>,

        #[arg(long)]
        remote: bool,

        #[arg(long)]
        to_remote: bool,
    },

    /// Remove decrypted scratch files
    ClearScratch,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn storage(remote: bool) -> StorageOption {
    if remote {
        StorageOption::Remote
    } else {
        StorageOption::Local
    }
}

async fn resolve_key(store: &MediaStore, name: Option<&str>) -> VaultResult<Key> {
    match name {
        Some(name) => store
            .keys()
            .get(name)
            .await
            .ok_or_else(|| VaultError::KeyNotFound(name.to_string())),
        None => store
            .keys()
            .current()
            .await
            .ok_or_else(|| VaultError::KeyNotFound("<current>".to_string())),
    }
}

async fn open_album(store: &MediaStore, name: &str, key: Option<&str>, remote: bool) -> VaultResult<Album> {
    let key = resolve_key(store, key).await?;
    store.create_album(name, storage(remote), &key)
}

fn find_media(store: &MediaStore, album: &Album, ids: &[String]) -> VaultResult<Vec<EncryptedMedia>> {
    let listed = store.enumerate(album)?;
    ids.iter()
        .map(|id| {
            listed.iter().find(|m| &m.id == id).cloned().ok_or_else(|| {
                VaultError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no media '{}' in {}", id, album.name),
                ))
            })
        })
        .collect()
}

async fn run(cli: Cli) -> VaultResult<()> {
    if let Commands::Init = cli.command {
        StoreConfig::default().save(&cli.config)?;
        println!("✅ Config written to: {}", cli.config.display());
        return Ok(());
    }

    let config = StoreConfig::load_or_default(&cli.config)?;
    let store = MediaStore::from_config(&config)?;

    if store.keys().has_password().await {
        store
            .keys()
            .check_password(cli.password.as_deref().unwrap_or_default())
            .await?;
    }

    match cli.command {
        Commands::Init => {}

        Commands::Keygen { name, words } => {
            println!("🔐 Generating key '{}'...", name);
            let key = match words {
                Some(words) => store.keys().generate_from_passphrase(&name, &words).await?,
                None => store.keys().generate(&name).await?,
            };
            println!("✅ Key created, fingerprint {}", key.fingerprint());
        }

        Commands::Keys => {
            let keys = store.keys().list().await;
            let current = store.keys().current().await;

            if keys.is_empty() {
                println!("📭 No keys");
            } else {
                println!("🔑 Keys ({}):", keys.len());
                println!("{:-<60}", "");
                for key in keys {
                    let marker = if current.as_ref() == Some(&key) { "⭐" } else { "  " };
                    println!(
                        "{} {} - {} (created {})",
                        marker,
                        key.name(),
                        key.fingerprint(),
                        key.creation_date().format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }

        Commands::ImportKey { serialized } => {
            let key = store.keys().import_key(serialized.trim()).await?;
            println!("✅ Imported key '{}'", key.name());
        }

        Commands::ExportKey { name } => {
            let key = resolve_key(&store, Some(&name)).await?;
            println!("{}", store.keys().export_key(&key)?);
        }

        Commands::DeleteKey { name } => {
            println!("🗑️ Deleting key: {}", name);
            let key = resolve_key(&store, Some(&name)).await?;
            store.delete_key(&key).await?;
            println!("✅ Key deleted!");
        }

        Commands::SetCurrent { name } => {
            store.keys().set_current(Some(&name)).await?;
            println!("✅ Current key: {}", name);
        }

        Commands::Backup { output } => {
            let document = store.keys().export_backup_document().await?;
            std::fs::write(&output, &document)?;
            println!("✅ Backup written to: {}", output.display());
        }

        Commands::Restore { input } => {
            let document = std::fs::read(&input)?;
            let imported = store.keys().import_backup_document(&document).await?;
            println!("✅ Imported {} keys", imported.len());
        }

        Commands::SetPassword { new } => {
            if store.keys().has_password().await {
                let existing = cli.password.unwrap_or_default();
                store.keys().change_password(&existing, &new).await?;
            } else {
                store.keys().set_password(&new).await?;
            }
            println!("✅ Password set");
        }

        Commands::Albums { key, remote } => {
            let key = resolve_key(&store, key.as_deref()).await?;
            let albums = store.albums(&key, storage(remote))?;

            println!("📁 Albums under '{}' ({}):", key.name(), albums.len());
            for album in albums {
                println!("   {} ({})", album.name, album.creation_date.format("%Y-%m-%d"));
            }
        }

        Commands::Save { path, album, key, remote } => {
            println!("📥 Saving: {}", path.display());
            let album = open_album(&store, &album, key.as_deref(), remote).await?;
            let saved = store.save(&CleartextMedia::from_file(&path), &album).await?;
            println!("✅ Saved with ID: {}", saved.id);
        }

        Commands::List { album, key, remote } => {
            let album = open_album(&store, &album, key.as_deref(), remote).await?;
            let media = store.enumerate(&album)?;

            if media.is_empty() {
                println!("📭 No media in {}", album.name);
            } else {
                println!("📷 Media in {} ({}):", album.name, media.len());
                println!("{:-<60}", "");
                for item in media {
                    let cloud = if item.needs_download { "☁️" } else { "  " };
                    println!("{} {} - {:?}", cloud, item.id, item.media_type);
                }
            }
        }

        Commands::Export { album, id, output, key, remote } => {
            println!("📤 Exporting: {}", id);
            let album = open_album(&store, &album, key.as_deref(), remote).await?;
            let media = find_media(&store, &album, &[id])?;

            let loaded = store
                .load(&media[0], &album, LoadDestination::ScratchFile, |p| {
                    log::debug!("progress {:.0}%", p * 100.0)
                })
                .await?;

            if let MediaSource::File(scratch) = loaded.source {
                tokio::fs::copy(&scratch, &output).await?;
                tokio::fs::remove_file(&scratch).await?;
            }
            println!("✅ Exported to: {}", output.display());
        }

        Commands::Delete { album, ids, key, remote } => {
            println!("🗑️ Deleting {} items", ids.len());
            let album = open_album(&store, &album, key.as_deref(), remote).await?;
            let media = find_media(&store, &album, &ids)?;
            store.delete(&media, &album).await?;
            println!("✅ Deleted!");
        }

        Commands::Move { from, to, ids, key, to_key, remote, to_remote } => {
            let source = open_album(&store, &from, key.as_deref(), remote).await?;
            let target_key = match to_key {
                Some(name) => resolve_key(&store, Some(&name)).await?,
                None => source.key.clone(),
            };
            let target = store.create_album(&to, storage(to_remote), &target_key)?;

            let media = find_media(&store, &source, &ids)?;
            let moved = store.move_media(&media, &source, &target).await?;
            println!("✅ Moved {} items to {}", moved.len(), target.name);
        }

        Commands::ClearScratch => {
            let removed = store.clear_scratch().await?;
            println!("🧹 Removed {} scratch files", removed);
        }
    }

    Ok(())
}
