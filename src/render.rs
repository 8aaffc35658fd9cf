use crate::heat::{GradientStop, HeatOptions};
use crate::lifecycle::HeatRenderer;
use crate::types::HeatPoint;
use anyhow::{Context, Result};
use image::{ImageBuffer, Rgba, RgbaImage};
use rayon::prelude::*;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// Constants for Web Mercator
const TILE_SIZE: u32 = 256;
const MAX_LAT: f64 = 85.051_128_78;

/// Tile directory and zoom range a heat layer is rendered into.
#[derive(Debug, Clone, PartialEq)]
pub struct TileTarget {
    pub dir: PathBuf,
    pub min_zoom: u8,
    pub max_zoom: u8,
}

/// A rendered heat layer: `dir/{z}/{x}/{y}.png`.
#[derive(Debug)]
pub struct TileLayer {
    pub id: usize,
    pub dir: PathBuf,
    pub tiles: usize,
}

/// Renders heat layers as PNG tile pyramids on disk.
#[derive(Debug, Default)]
pub struct TileSurface {
    next_id: usize,
}

impl TileSurface {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HeatRenderer for TileSurface {
    type Map = TileTarget;
    type Handle = TileLayer;

    fn create(
        &mut self,
        map: &TileTarget,
        points: &[HeatPoint],
        options: &HeatOptions,
    ) -> Result<TileLayer> {
        self.next_id += 1;
        let id = self.next_id;
        let dir = layer_dir(map, id);

        info!(
            "Rendering heat layer {} from zoom {} to {}...",
            id, map.min_zoom, map.max_zoom
        );
        let gradient = Gradient::new(&options.gradient);
        let rendered = (map.min_zoom..=map.max_zoom)
            .into_par_iter()
            .map(|z| render_zoom_level(&dir, z, points, options, &gradient))
            .collect::<Result<Vec<usize>>>();

        match rendered {
            Ok(counts) => Ok(TileLayer {
                id,
                dir,
                tiles: counts.into_iter().sum(),
            }),
            Err(err) => {
                // Without a handle nothing else removes these tiles.
                if dir.exists() {
                    if let Err(cleanup) = fs::remove_dir_all(&dir) {
                        warn!("Failed to remove partial heat layer {:?}: {}", dir, cleanup);
                    }
                }
                Err(err)
            }
        }
    }

    fn remove(&mut self, _map: &TileTarget, handle: TileLayer) -> Result<()> {
        if handle.dir.exists() {
            fs::remove_dir_all(&handle.dir)
                .with_context(|| format!("Failed to remove heat layer {:?}", handle.dir))?;
        }
        debug!(id = handle.id, "heat layer tiles removed");
        Ok(())
    }
}

/// `heat-<pid>-<id>` below the target, so processes sharing a tile dir never collide.
fn layer_dir(map: &TileTarget, id: usize) -> PathBuf {
    map.dir.join(format!("heat-{}-{}", std::process::id(), id))
}

fn render_zoom_level(
    layer_dir: &Path,
    zoom: u8,
    points: &[HeatPoint],
    options: &HeatOptions,
    gradient: &Gradient,
) -> Result<usize> {
    let discrete = zoom >= options.max_zoom;
    let (radius, blur) = if discrete {
        (1.0, 0.0)
    } else {
        (options.radius.max(1.0), options.blur.max(0.0))
    };
    let reach = radius.ceil() as i64;
    let world = i64::from(TILE_SIZE) << zoom;
    let tile = i64::from(TILE_SIZE);

    let mut density: HashMap<(u32, u32), Vec<f32>> = HashMap::new();
    for point in points {
        let (gx, gy) = lat_lon_to_pixel(point.lat, point.lon, zoom);
        for dy in -reach..=reach {
            for dx in -reach..=reach {
                let weight = kernel(((dx * dx + dy * dy) as f64).sqrt(), radius, blur);
                let (px, py) = (gx + dx, gy + dy);
                if weight <= 0.0 || px < 0 || py < 0 || px >= world || py >= world {
                    continue;
                }
                let cell = density
                    .entry(((px / tile) as u32, (py / tile) as u32))
                    .or_insert_with(|| vec![0.0; (TILE_SIZE * TILE_SIZE) as usize]);
                cell[((py % tile) * tile + px % tile) as usize] += (weight * point.intensity) as f32;
            }
        }
    }

    let max = density
        .values()
        .flat_map(|cells| cells.iter().copied())
        .fold(0.0_f32, f32::max);
    if max <= 0.0 {
        return Ok(0);
    }

    let z_dir = layer_dir.join(zoom.to_string());
    fs::create_dir_all(&z_dir).context("Failed to create zoom directory")?;

    density
        .par_iter()
        .map(|((x, y), cells)| {
            let img: RgbaImage = ImageBuffer::from_fn(TILE_SIZE, TILE_SIZE, |px, py| {
                let value = cells[(py * TILE_SIZE + px) as usize];
                if value > 0.0 {
                    gradient.color_at(f64::from(value / max))
                } else {
                    Rgba([0, 0, 0, 0])
                }
            });

            let x_dir = z_dir.join(x.to_string());
            fs::create_dir_all(&x_dir).with_context(|| format!("Failed to create {:?}", x_dir))?;
            let path = x_dir.join(format!("{}.png", y));
            img.save(&path)
                .with_context(|| format!("Failed to save tile {:?}", path))
        })
        .collect::<Result<Vec<()>>>()?;

    Ok(density.len())
}

/// Full weight inside `radius - blur`, fading linearly to zero at `radius`.
fn kernel(dist: f64, radius: f64, blur: f64) -> f64 {
    let inner = (radius - blur).max(0.0);
    if dist <= inner {
        1.0
    } else if dist <= radius {
        1.0 - (dist - inner) / (radius - inner)
    } else {
        0.0
    }
}

/// Colour ramp built from sorted gradient stops.
struct Gradient {
    stops: Vec<(f64, [u8; 3])>,
}

impl Gradient {
    fn new(stops: &[GradientStop]) -> Self {
        let mut stops: Vec<(f64, [u8; 3])> = stops
            .iter()
            .map(|s| (s.stop.clamp(0.0, 1.0), hex_to_rgb(&s.color)))
            .collect();
        stops.sort_by(|a, b| a.0.total_cmp(&b.0));
        if stops.is_empty() {
            warn!("empty heat gradient, falling back to red");
            stops.push((1.0, [255, 0, 0]));
        }
        Self { stops }
    }

    fn color_at(&self, t: f64) -> Rgba<u8> {
        let t = t.clamp(0.0, 1.0);
        let alpha = (80.0 + 175.0 * t).round() as u8;

        let rgb = match self.stops.iter().position(|(stop, _)| t <= *stop) {
            Some(0) => self.stops[0].1,
            Some(i) => {
                let (lo, lo_rgb) = self.stops[i - 1];
                let (hi, hi_rgb) = self.stops[i];
                let f = if hi > lo { (t - lo) / (hi - lo) } else { 1.0 };
                let mix = |a: u8, b: u8| (f64::from(a) + (f64::from(b) - f64::from(a)) * f).round() as u8;
                [mix(lo_rgb[0], hi_rgb[0]), mix(lo_rgb[1], hi_rgb[1]), mix(lo_rgb[2], hi_rgb[2])]
            }
            None => self.stops[self.stops.len() - 1].1,
        };

        Rgba([rgb[0], rgb[1], rgb[2], alpha])
    }
}

fn hex_to_rgb(hex: &str) -> [u8; 3] {
    let hex = hex.trim_start_matches('#');
    let channel = |range: std::ops::Range<usize>| {
        hex.get(range)
            .and_then(|h| u8::from_str_radix(h, 16).ok())
            .unwrap_or(0)
    };
    [channel(0..2), channel(2..4), channel(4..6)]
}

// Global web mercator pixel at `zoom`.
fn lat_lon_to_pixel(lat: f64, lon: f64, zoom: u8) -> (i64, i64) {
    let n = 2.0_f64.powi(zoom as i32);
    let lat_rad = lat.clamp(-MAX_LAT, MAX_LAT).to_radians();
    let x_t = (lon + 180.0) / 360.0 * n;
    let y_t = (1.0 - (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() / PI) / 2.0 * n;

    let size = f64::from(TILE_SIZE);
    ((x_t * size).floor() as i64, (y_t * size).floor() as i64)
}
