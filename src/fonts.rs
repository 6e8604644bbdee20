//! Font discovery for the title overlay.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};
use usvg::fontdb;

/// Loads system fonts plus any `.ttf`/`.otf`/`.ttc` files in `extra_dir`.
pub fn load_fonts(extra_dir: Option<&Path>) -> Arc<fontdb::Database> {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();

    if let Some(dir) = extra_dir {
        load_fonts_from_dir(&mut db, dir);
    }

    let faces = db.faces().count();
    if faces == 0 {
        warn!("No fonts found; cards will be produced without a title");
    } else {
        debug!("Loaded {faces} font faces");
    }
    Arc::new(db)
}

fn load_fonts_from_dir(db: &mut fontdb::Database, dir: &Path) {
    let Ok(rd) = std::fs::read_dir(dir) else {
        warn!("Font directory {} is not readable", dir.display());
        return;
    };

    for entry in rd.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(ext) = path.extension().and_then(|s| s.to_str()) else {
            continue;
        };
        let ext = ext.to_ascii_lowercase();
        if ext != "ttf" && ext != "otf" && ext != "ttc" {
            continue;
        }
        if let Err(err) = db.load_font_file(&path) {
            warn!("Skipping font {}: {}", path.display(), err);
        }
    }
}

/// Resolves the requested families, then generic `cursive`, then any sans or serif face, then
/// whatever face comes first.
pub fn cursive_fallback_resolver() -> usvg::FontResolver<'static> {
    use usvg::FontResolver;

    FontResolver {
        select_font: Box::new(|font, db| {
            let mut families = Vec::<fontdb::Family<'_>>::new();
            for family in font.families() {
                families.push(match family {
                    usvg::FontFamily::Serif => fontdb::Family::Serif,
                    usvg::FontFamily::SansSerif => fontdb::Family::SansSerif,
                    usvg::FontFamily::Cursive => fontdb::Family::Cursive,
                    usvg::FontFamily::Fantasy => fontdb::Family::Fantasy,
                    usvg::FontFamily::Monospace => fontdb::Family::Monospace,
                    usvg::FontFamily::Named(s) => fontdb::Family::Name(s),
                });
            }

            families.push(fontdb::Family::Cursive);
            families.push(fontdb::Family::SansSerif);
            families.push(fontdb::Family::Serif);

            let style = match font.style() {
                usvg::FontStyle::Normal => fontdb::Style::Normal,
                usvg::FontStyle::Italic => fontdb::Style::Italic,
                usvg::FontStyle::Oblique => fontdb::Style::Oblique,
            };

            let query = fontdb::Query {
                families: &families,
                weight: fontdb::Weight(font.weight()),
                stretch: fontdb::Stretch::Normal,
                style,
            };

            if let Some(id) = db.query(&query) {
                return Some(id);
            }
            db.faces().next().map(|f| f.id)
        }),
        select_fallback: FontResolver::default_fallback_selector(),
    }
}
