use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use bevy::prelude::*;
use clap::Parser;
use role_icons::{
    HeadTracking, IconSprite, IconTemplate, LocalViewer, Participant, RoleDocument,
    RoleIconSettings, RoleIcons, RoleIconsDisabled, RoleIconsPlugin, SessionJoined, SessionLeft,
};
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::filter_fn, fmt, prelude::*};

const LOG_SIM: &str = "role_icons_sim";

#[derive(Parser)]
#[command(name = "role_icons_sim")]
#[command(about = "Headless role icon simulation")]
struct Args {
    /// Settings file with a [role_icons] section
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Role document (JSON); replaces the source from the settings
    #[arg(short, long)]
    document: Option<PathBuf>,

    /// Number of simulated frames
    #[arg(short, long, default_value_t = 600)]
    ticks: u32,

    /// Number of simulated sessions
    #[arg(short, long, default_value_t = 12)]
    participants: usize,

    /// Simulated frame time in milliseconds
    #[arg(long, default_value_t = 100)]
    step_ms: u64,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Debug level logging
    #[arg(short, long)]
    verbose: bool,
}

/// Circular walk around the viewer.
#[derive(Component)]
struct Walker {
    radius: f32,
    speed: f32,
    phase: f32,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = init_logging(args.verbose, args.log_file.as_deref())?;

    let mut settings = match &args.config {
        Some(path) => RoleIconSettings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => RoleIconSettings::default(),
    };
    if let Some(document) = &args.document {
        settings.document_path = Some(document.clone());
    }

    let members = match settings.document_path.clone() {
        Some(path) => document_members(&path, &mut settings)?,
        None => Vec::new(),
    };

    let mut app = App::new();
    app.init_resource::<Time>()
        .insert_resource(settings)
        .insert_resource(IconTemplate::default())
        .add_plugins(RoleIconsPlugin)
        .add_systems(Update, walk_participants.before(role_icons::RoleIconsSet::Ingest));

    app.world_mut()
        .spawn((LocalViewer, Transform::default(), head_at(Vec3::ZERO)));
    let identities: Vec<String> = members
        .into_iter()
        .chain((0..).map(|i| format!("Guest{i}")))
        .take(args.participants)
        .collect();
    for (index, identity) in identities.iter().enumerate() {
        spawn_participant(app.world_mut(), identity, index);
    }

    let step = Duration::from_millis(args.step_ms);
    let leave_at = args.ticks / 2;
    let join_at = args.ticks * 3 / 4;
    for tick in 0..args.ticks {
        if tick == leave_at {
            if let Some(identity) = identities.last() {
                leave(app.world_mut(), identity);
            }
        }
        if tick == join_at {
            if let Some(identity) = identities.last() {
                info!(target: LOG_SIM, "{} rejoins", identity);
                spawn_participant(app.world_mut(), identity, identities.len() - 1);
                app.world_mut().send_event(SessionJoined {
                    identity: identity.clone(),
                });
            }
        }

        app.world_mut().resource_mut::<Time>().advance_by(step);
        app.update();
        // Lets background fetches land between frames.
        thread::sleep(Duration::from_millis(1));
    }

    report(app.world_mut());
    Ok(())
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = if verbose {
        LevelFilter::DEBUG
    } else if cfg!(debug_assertions) {
        LevelFilter::INFO
    } else {
        LevelFilter::WARN
    };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let name = path.file_name().context("log file path has no file name")?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = fmt::Layer::default()
                .with_target(true)
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter_fn(move |metadata| metadata.level() <= &level));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = fmt::Layer::default()
        .with_target(true)
        .with_filter(filter_fn(move |metadata| metadata.level() <= &level));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .init();
    Ok(guard)
}

/// Identities listed in the document, in document order. Roles without a
/// configured sprite get a placeholder so every role is visible in the run.
fn document_members(path: &Path, settings: &mut RoleIconSettings) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading role document {}", path.display()))?;
    let document = RoleDocument::parse(&text)
        .with_context(|| format!("parsing role document {}", path.display()))?;

    let mut members = Vec::new();
    for role in &document.roles {
        if settings.role_sprites.get(&role.name).is_none() {
            settings
                .role_sprites
                .insert(role.name.clone(), format!("icons/{}.png", role.name));
        }
        for member in &role.members {
            if !members.contains(member) {
                members.push(member.clone());
            }
        }
    }
    Ok(members)
}

fn head_at(position: Vec3) -> HeadTracking {
    HeadTracking {
        position: position + Vec3::Y * 1.7,
        rotation: Quat::IDENTITY,
    }
}

fn spawn_participant(world: &mut World, identity: &str, index: usize) {
    let walker = Walker {
        radius: 5.0 + 7.5 * index as f32,
        speed: 0.2 + 0.05 * (index % 4) as f32,
        phase: index as f32,
    };
    let position = Vec3::new(walker.radius, 0.0, 0.0);
    world.spawn((
        Participant::new(identity),
        Transform::from_translation(position),
        head_at(position),
        walker,
    ));
}

fn leave(world: &mut World, identity: &str) {
    let mut query = world.query::<(Entity, &Participant)>();
    let leaving: Vec<Entity> = query
        .iter(world)
        .filter(|(_, participant)| participant.identity == identity)
        .map(|(entity, _)| entity)
        .collect();
    for entity in leaving {
        world.despawn(entity);
    }
    info!(target: LOG_SIM, "{} leaves", identity);
    world.send_event(SessionLeft {
        identity: identity.to_owned(),
    });
}

fn walk_participants(
    time: Res<Time>,
    mut walkers: Query<(&Walker, &mut Transform, &mut HeadTracking)>,
) {
    let t = time.elapsed_secs();
    for (walker, mut transform, mut head) in &mut walkers {
        let angle = walker.phase + walker.speed * t;
        let position = Vec3::new(angle.cos(), 0.0, angle.sin()) * walker.radius;
        transform.translation = position;
        *head = head_at(position);
    }
}

fn report(world: &mut World) {
    if let Some(disabled) = world.get_resource::<RoleIconsDisabled>() {
        println!("role icons disabled: {}", disabled.0);
        return;
    }
    {
        let Some(icons) = world.get_resource::<RoleIcons>() else {
            println!("role icons never started");
            return;
        };
        let stats = icons.stats();
        println!(
            "{} roles, {} icons bound, pool {}/{}",
            icons.table().role_count(),
            icons.bound_count(),
            icons.pool().leased(),
            icons.pool().capacity()
        );
        println!(
            "leases {} releases {} exhausted {} refreshes {} ({} failed) scan cycles {}",
            stats.leases,
            stats.releases,
            stats.exhausted,
            stats.refreshes,
            stats.refresh_failures,
            stats.scan_cycles
        );
    }

    let mut query = world.query::<(&Name, &IconSprite, &Transform)>();
    for (name, sprite, transform) in query.iter(world) {
        if sprite.path.is_some() {
            println!(
                "  {:<24} visible={:<5} at {:.1?}",
                name.as_str(),
                sprite.visible,
                transform.translation
            );
        }
    }
}
