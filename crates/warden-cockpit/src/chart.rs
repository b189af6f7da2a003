//! Temperature history chart.
//!
//! Samples are averaged per clock hour; hours without samples are filled by
//! linear interpolation between their neighbours (and carried forward or
//! backward at the edges).  The series is drawn as a polyline over a plain
//! grid and encoded as JPEG.

use std::collections::BTreeMap;
use std::io::Cursor;

use chrono::{NaiveDateTime, TimeDelta, Timelike};
use image::{ImageFormat, Rgb, RgbImage};
use warden_types::{TemperatureSample, WardenError};

pub const CHART_WIDTH: u32 = 800;
pub const CHART_HEIGHT: u32 = 400;

const MARGIN: u32 = 24;
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);
const AXIS: Rgb<u8> = Rgb([90, 90, 90]);
const LINE: Rgb<u8> = Rgb([31, 119, 180]);

fn hour_of(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// Hourly mean temperatures covering every hour from the first to the last
/// sample, gaps interpolated.
pub fn hourly_means(samples: &[TemperatureSample]) -> Vec<(NaiveDateTime, f64)> {
    let mut buckets: BTreeMap<NaiveDateTime, (f64, usize)> = BTreeMap::new();
    for s in samples {
        let b = buckets.entry(hour_of(s.timestamp)).or_insert((0.0, 0));
        b.0 += s.celsius;
        b.1 += 1;
    }
    let (Some(&first), Some(&last)) = (buckets.keys().next(), buckets.keys().next_back()) else {
        return Vec::new();
    };

    let mut hours = Vec::new();
    let mut t = first;
    while t <= last {
        hours.push((t, buckets.get(&t).map(|(sum, n)| sum / *n as f64)));
        t += TimeDelta::hours(1);
    }
    let values = fill_gaps(hours.iter().map(|(_, v)| *v).collect());
    hours.into_iter().map(|(t, _)| t).zip(values).collect()
}

fn fill_gaps(values: Vec<Option<f64>>) -> Vec<f64> {
    let known: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, v)))
        .collect();
    let Some(&(first_i, first_v)) = known.first() else {
        return Vec::new();
    };
    let mut out = vec![first_v; values.len()];
    for w in known.windows(2) {
        let ((i0, v0), (i1, v1)) = (w[0], w[1]);
        for (i, slot) in out.iter_mut().enumerate().take(i1 + 1).skip(i0) {
            *slot = v0 + (v1 - v0) * (i - i0) as f64 / (i1 - i0) as f64;
        }
    }
    if let Some(&(last_i, last_v)) = known.last() {
        out[last_i..].iter_mut().for_each(|v| *v = last_v);
    }
    out[..first_i].iter_mut().for_each(|v| *v = first_v);
    out
}

/// Draw `series` and encode the chart as JPEG.  An empty series yields an
/// empty grid.
///
/// # Errors
///
/// Returns [`WardenError::Storage`] when JPEG encoding fails.
pub fn render_jpeg(series: &[(NaiveDateTime, f64)]) -> Result<Vec<u8>, WardenError> {
    let mut img = RgbImage::from_pixel(CHART_WIDTH, CHART_HEIGHT, BACKGROUND);
    let (left, right) = (MARGIN, CHART_WIDTH - MARGIN);
    let (top, bottom) = (MARGIN, CHART_HEIGHT - MARGIN);

    for i in 1..4 {
        let y = top + (bottom - top) * i / 4;
        line(&mut img, (left as i64, y as i64), (right as i64, y as i64), GRID);
    }
    line(&mut img, (left as i64, top as i64), (left as i64, bottom as i64), AXIS);
    line(&mut img, (left as i64, bottom as i64), (right as i64, bottom as i64), AXIS);

    if !series.is_empty() {
        let (lo, hi) = series
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (_, v)| (lo.min(*v), hi.max(*v)));
        let pad = ((hi - lo) * 0.1).max(0.5);
        let (lo, hi) = (lo - pad, hi + pad);
        let span_x = (series.len().max(2) - 1) as f64;
        let points: Vec<(i64, i64)> = series
            .iter()
            .enumerate()
            .map(|(i, (_, v))| {
                let x = left as f64 + (right - left) as f64 * i as f64 / span_x;
                let y = bottom as f64 - (bottom - top) as f64 * (v - lo) / (hi - lo);
                (x.round() as i64, y.round() as i64)
            })
            .collect();
        if let [only] = points.as_slice() {
            line(&mut img, *only, *only, LINE);
        }
        for w in points.windows(2) {
            line(&mut img, w[0], w[1], LINE);
        }
    }

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Jpeg)
        .map_err(|e| WardenError::Storage(format!("chart encode failed: {e}")))?;
    Ok(out.into_inner())
}

/// Bresenham line, clipped to the image.
fn line(img: &mut RgbImage, (x0, y0): (i64, i64), (x1, y1): (i64, i64), color: Rgb<u8>) {
    let (dx, dy) = ((x1 - x0).abs(), -(y1 - y0).abs());
    let (sx, sy) = (if x0 < x1 { 1 } else { -1 }, if y0 < y1 { 1 } else { -1 });
    let (mut x, mut y, mut err) = (x0, y0, dx + dy);
    loop {
        if (0..img.width() as i64).contains(&x) && (0..img.height() as i64).contains(&y) {
            img.put_pixel(x as u32, y as u32, color);
        }
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}
