mod cache;
mod config;
mod constants;
mod contacts;
mod mail;
mod mailer;
mod sync;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::error;
use tracing_subscriber::EnvFilter;

use cache::Cache;
use config::Config;
use constants::DEFAULT_PAGE_SIZE;
use mailer::Mailer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    match args.as_slice() {
        ["sync"] => sync_all().await,
        ["sync", tenant] => sync_tenant(tenant, None).await,
        ["sync", tenant, folder] => sync_tenant(tenant, Some(folder)).await,
        ["folders", tenant] => list_folders(tenant).await,
        ["messages", tenant, folder] => list_messages(tenant, folder, 1, DEFAULT_PAGE_SIZE).await,
        ["messages", tenant, folder, page] => {
            let page = parse_number(page, "page")?;
            list_messages(tenant, folder, page, DEFAULT_PAGE_SIZE).await
        }
        ["messages", tenant, folder, page, per_page] => {
            let page = parse_number(page, "page")?;
            let per_page = parse_number(per_page, "per-page")?;
            list_messages(tenant, folder, page, per_page).await
        }
        ["message", tenant, folder, uid] => show_message(tenant, folder, parse_number(uid, "uid")?).await,
        ["attachment", tenant, folder, uid, id] => {
            save_attachment(tenant, folder, parse_number(uid, "uid")?, id, None).await
        }
        ["attachment", tenant, folder, uid, id, path] => {
            save_attachment(tenant, folder, parse_number(uid, "uid")?, id, Some(path)).await
        }
        ["read", tenant, folder, uid] => mark_read(tenant, folder, parse_number(uid, "uid")?).await,
        ["flag", tenant, folder, uid] => {
            set_flag(tenant, folder, parse_number(uid, "uid")?, true).await
        }
        ["unflag", tenant, folder, uid] => {
            set_flag(tenant, folder, parse_number(uid, "uid")?, false).await
        }
        ["delete", tenant, folder, uids @ ..] if !uids.is_empty() => {
            let uids = uids
                .iter()
                .map(|u| parse_number(u, "uid"))
                .collect::<Result<Vec<_>>>()?;
            delete_messages(tenant, folder, &uids).await
        }
        ["send", tenant, to, subject] => send_message(tenant, to, subject, None, None).await,
        ["send", tenant, to, subject, cc] => send_message(tenant, to, subject, Some(cc), None).await,
        ["send", tenant, to, subject, cc, bcc] => {
            send_message(tenant, to, subject, Some(cc), Some(bcc)).await
        }
        ["check"] => check(None).await,
        ["check", tenant] => check(Some(tenant)).await,
        [] | ["help"] => {
            print_usage();
            Ok(())
        }
        other => {
            print_usage();
            bail!("unknown command: {}", other.join(" "));
        }
    }
}

fn print_usage() {
    println!(
        "Usage:\n\
         \x20 mailsync sync [TENANT [FOLDER]]        reconcile all tenants, one tenant, or one folder\n\
         \x20 mailsync folders TENANT                list folders with message and unseen counts\n\
         \x20 mailsync messages TENANT FOLDER [PAGE [PER-PAGE]]\n\
         \x20                                        list a page of cached messages\n\
         \x20 mailsync message TENANT FOLDER UID     show one message in full\n\
         \x20 mailsync attachment TENANT FOLDER UID ID [PATH]\n\
         \x20                                        save an attachment (default: its own name)\n\
         \x20 mailsync read TENANT FOLDER UID        mark a message read\n\
         \x20 mailsync flag TENANT FOLDER UID        flag a message\n\
         \x20 mailsync unflag TENANT FOLDER UID      remove the flag\n\
         \x20 mailsync delete TENANT FOLDER UID...   delete messages\n\
         \x20 mailsync send TENANT TO SUBJECT [CC [BCC]]\n\
         \x20                                        send mail; HTML body is read from stdin\n\
         \x20 mailsync check [TENANT]                probe IMAP and SMTP connections\n\
         \x20 mailsync help                          show this message"
    );
}

fn parse_number(value: &str, name: &str) -> Result<u32> {
    value
        .parse()
        .with_context(|| format!("invalid {name}: {value}"))
}

async fn open_cache() -> Result<Arc<Cache>> {
    Config::ensure_dirs()?;
    let path = Config::cache_path()?;
    let cache = Cache::open(&path)
        .await
        .with_context(|| format!("Failed to open cache at {}", path.display()))?;
    Ok(Arc::new(cache))
}

fn mailer_for(config: &Config, tenant: &str, cache: Arc<Cache>) -> Result<Mailer> {
    let tenant_config = config
        .tenant(tenant)
        .with_context(|| format!("unknown tenant: {tenant}"))?;
    Ok(Mailer::new(tenant_config, cache)?)
}

/// Reconcile every configured tenant, one task per tenant. Tenant
/// failures are collected so one broken mailbox cannot mask the rest.
async fn sync_all() -> Result<()> {
    let config = Config::load()?;
    let cache = open_cache().await?;

    let mut handles = Vec::new();
    for tenant_config in &config.tenants {
        let tenant_config = tenant_config.clone();
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            let id = tenant_config.id.clone();
            let result = async {
                let mut mailer = Mailer::new(&tenant_config, cache)?;
                mailer.synchronize(None).await
            }
            .await;
            (id, result)
        }));
    }

    let mut failures = 0;
    for handle in handles {
        let (tenant, result) = handle.await.context("sync task panicked")?;
        match result {
            Ok(reports) => print_reports(&tenant, &reports),
            Err(err) => {
                failures += 1;
                error!(%tenant, %err, "synchronization failed");
            }
        }
    }

    if failures > 0 {
        bail!("{failures} tenant(s) failed to synchronize");
    }
    Ok(())
}

async fn sync_tenant(tenant: &str, folder: Option<&str>) -> Result<()> {
    let config = Config::load()?;
    let cache = open_cache().await?;
    let mut mailer = mailer_for(&config, tenant, cache)?;

    let reports = mailer.synchronize(folder).await?;
    print_reports(tenant, &reports);
    Ok(())
}

fn print_reports(tenant: &str, reports: &[sync::SyncReport]) {
    for report in reports {
        println!(
            "{tenant}/{}: {} imported, {} deleted, {} seen updates, {} flag updates, {} skipped",
            report.folder,
            report.imported,
            report.deleted,
            report.seen_updates,
            report.flag_updates,
            report.skipped
        );
    }
}

async fn list_folders(tenant: &str) -> Result<()> {
    let config = Config::load()?;
    let cache = open_cache().await?;
    let mut mailer = mailer_for(&config, tenant, cache)?;

    for folder in mailer.list_folders().await? {
        println!(
            "{:40} {:>6} messages, {:>5} unseen",
            folder.name, folder.total, folder.unseen
        );
    }
    Ok(())
}

async fn list_messages(tenant: &str, folder: &str, page: u32, per_page: u32) -> Result<()> {
    let config = Config::load()?;
    let cache = open_cache().await?;
    let mailer = mailer_for(&config, tenant, cache)?;

    let listing = mailer.list_messages(folder, page, per_page).await?;
    println!(
        "{tenant}/{folder}: page {} of {} messages",
        listing.page, listing.total
    );
    for message in &listing.items {
        let marker = if message.seen { ' ' } else { '*' };
        let date = chrono::DateTime::from_timestamp(message.timestamp, 0)
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "{marker} {:>6}  {date}  {:30}  {}",
            message.uid, message.from, message.subject
        );
    }
    Ok(())
}

async fn show_message(tenant: &str, folder: &str, uid: u32) -> Result<()> {
    let config = Config::load()?;
    let cache = open_cache().await?;
    let mut mailer = mailer_for(&config, tenant, cache)?;

    let message = mailer.message_by_id(folder, uid).await?;
    let date = chrono::DateTime::from_timestamp(message.timestamp, 0)
        .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();

    println!("From:    {}", message.from);
    println!("To:      {}", message.to);
    println!("Date:    {date}");
    println!("Subject: {}", message.subject);
    if !message.attachments.is_empty() {
        for attachment in message
            .attachments
            .inline
            .iter()
            .chain(&message.attachments.attached)
        {
            println!(
                "Part:    {} ({} bytes, id {})",
                attachment.name, attachment.size, attachment.id
            );
        }
    }
    println!();
    println!("{}", message.body.as_deref().unwrap_or("(body withheld)"));
    Ok(())
}

async fn save_attachment(
    tenant: &str,
    folder: &str,
    uid: u32,
    id: &str,
    path: Option<&str>,
) -> Result<()> {
    let config = Config::load()?;
    let cache = open_cache().await?;
    let mut mailer = mailer_for(&config, tenant, cache)?;

    let (attachment, data) = mailer.attachment_by_id(folder, uid, id).await?;
    let path = path.unwrap_or(&attachment.name);
    std::fs::write(path, &data)
        .with_context(|| format!("Failed to write attachment to {path}"))?;
    println!("{}: {} bytes written", path, data.len());
    Ok(())
}

async fn mark_read(tenant: &str, folder: &str, uid: u32) -> Result<()> {
    let config = Config::load()?;
    let cache = open_cache().await?;
    let mut mailer = mailer_for(&config, tenant, cache)?;
    mailer.mark_read(folder, uid).await?;
    println!("{tenant}/{folder}/{uid}: marked read");
    Ok(())
}

async fn set_flag(tenant: &str, folder: &str, uid: u32, flagged: bool) -> Result<()> {
    let config = Config::load()?;
    let cache = open_cache().await?;
    let mut mailer = mailer_for(&config, tenant, cache)?;
    if flagged {
        mailer.flag_message(folder, uid).await?;
        println!("{tenant}/{folder}/{uid}: flagged");
    } else {
        mailer.unflag_message(folder, uid).await?;
        println!("{tenant}/{folder}/{uid}: unflagged");
    }
    Ok(())
}

async fn delete_messages(tenant: &str, folder: &str, uids: &[u32]) -> Result<()> {
    let config = Config::load()?;
    let cache = open_cache().await?;
    let mut mailer = mailer_for(&config, tenant, cache)?;
    mailer.delete_messages(folder, uids).await?;
    println!("{tenant}/{folder}: {} message(s) deleted", uids.len());
    Ok(())
}

async fn send_message(
    tenant: &str,
    to: &str,
    subject: &str,
    cc: Option<&str>,
    bcc: Option<&str>,
) -> Result<()> {
    let config = Config::load()?;
    let cache = open_cache().await?;
    let mut mailer = mailer_for(&config, tenant, cache)?;

    let html_body = std::io::read_to_string(std::io::stdin())
        .context("Failed to read message body from stdin")?;

    match mailer.send_message(to, subject, &html_body, cc, bcc).await? {
        Some(folder) => println!("sent; filed in {folder}"),
        None => println!("sent; no sent folder to file in"),
    }
    Ok(())
}

async fn check(tenant: Option<&str>) -> Result<()> {
    let config = Config::load()?;
    let cache = open_cache().await?;

    let tenants: Vec<&config::TenantConfig> = match tenant {
        Some(id) => vec![
            config
                .tenant(id)
                .with_context(|| format!("unknown tenant: {id}"))?,
        ],
        None => config.tenants.iter().collect(),
    };

    let mut all_ok = true;
    for tenant_config in tenants {
        let mut mailer = Mailer::new(tenant_config, Arc::clone(&cache))?;
        if mailer.check_connection().await {
            println!("{}: ok", tenant_config.id);
        } else {
            all_ok = false;
            println!("{}: FAILED", tenant_config.id);
            for diagnostic in mailer.connection_errors() {
                println!("  {diagnostic}");
            }
        }
    }

    if !all_ok {
        std::process::exit(1);
    }
    Ok(())
}
