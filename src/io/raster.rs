use crate::core::filter::{Aoi, METERS_PER_DEGREE};
use crate::types::{
    AnalysisGrid, AssetSource, BandStack, CompareError, CompareResult, GeoTransform, Image,
    ImageRecord, LinkedRecord, Pixel,
};
use gdal::raster::{Buffer, GdalType};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::{Dataset, DriverManager};
use ndarray::{s, Array2, Array3};
use num_traits::{NumCast, ToPrimitive};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::path::Path;

/// Parse `EPSG:xxxx` (case-insensitive) or a bare code
pub fn parse_epsg(crs: &str) -> CompareResult<u32> {
    let trimmed = crs.trim();
    let code = trimmed
        .strip_prefix("EPSG:")
        .or_else(|| trimmed.strip_prefix("epsg:"))
        .unwrap_or(trimmed);
    code.parse::<u32>()
        .map_err(|_| CompareError::Config(format!("unsupported CRS '{}', expected EPSG:<code>", crs)))
}

/// Spatial reference with lon/lat (x/y) axis order regardless of authority
fn spatial_ref(epsg: u32) -> CompareResult<SpatialRef> {
    let srs = SpatialRef::from_epsg(epsg)?;
    srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
    Ok(srs)
}

/// Largest grid `grid_for_region` will describe
pub const MAX_GRID_PIXELS: f64 = 1e13;

/// Column and row counts of `extent` (width, height) at `pixel` units per pixel, as floats
fn grid_counts(width: f64, height: f64, pixel: f64) -> (f64, f64) {
    ((width / pixel).ceil().max(1.0), (height / pixel).ceil().max(1.0))
}

fn grid_dims(width: f64, height: f64, pixel: f64) -> CompareResult<(usize, usize)> {
    let (cols, rows) = grid_counts(width, height, pixel);
    let pixels = cols * rows;
    if !pixels.is_finite() || pixels > MAX_GRID_PIXELS {
        return Err(CompareError::Config(format!(
            "grid of {:e} x {:e} pixels exceeds the {:e} pixel limit",
            cols, rows, MAX_GRID_PIXELS
        )));
    }
    Ok((cols as usize, rows as usize))
}

/// Projected bbox of the AOI plus the pixel size in CRS units
fn region_extent(aoi: &Aoi, epsg: u32, scale: f64) -> CompareResult<(f64, f64, f64, f64, f64)> {
    if !(scale > 0.0 && scale.is_finite()) {
        return Err(CompareError::Config(format!("scale {} must be positive", scale)));
    }

    if epsg == 4326 {
        let bbox = aoi.bbox();
        return Ok((bbox.min_lon, bbox.max_lon, bbox.min_lat, bbox.max_lat, scale / METERS_PER_DEGREE));
    }

    let wgs84 = spatial_ref(4326)?;
    let target = spatial_ref(epsg)?;
    let transform = CoordTransform::new(&wgs84, &target)?;
    let ring = aoi.polygon().exterior();
    let mut xs: Vec<f64> = ring.coords().map(|c| c.x).collect();
    let mut ys: Vec<f64> = ring.coords().map(|c| c.y).collect();
    let mut zs = vec![0.0; xs.len()];
    transform.transform_coords(&mut xs, &mut ys, &mut zs)?;
    let fold = |v: &[f64]| {
        v.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)))
    };
    let (min_x, max_x) = fold(&xs);
    let (min_y, max_y) = fold(&ys);
    Ok((min_x, max_x, min_y, max_y, scale))
}

/// Pixel count of the grid `grid_for_region` would build, without building it.
/// May be far above anything representable as `usize`.
pub fn region_pixel_count(aoi: &Aoi, epsg: u32, scale: f64) -> CompareResult<f64> {
    let (min_x, max_x, min_y, max_y, pixel) = region_extent(aoi, epsg, scale)?;
    let (cols, rows) = grid_counts(max_x - min_x, max_y - min_y, pixel);
    Ok(cols * rows)
}

/// Pixel grid covering the AOI bbox at `scale` meters in `epsg`.
///
/// For EPSG:4326 the scale is converted with the equatorial meters/degree,
/// so no GDAL call is needed.
pub fn grid_for_region(aoi: &Aoi, epsg: u32, scale: f64) -> CompareResult<AnalysisGrid> {
    let (min_x, max_x, min_y, max_y, pixel) = region_extent(aoi, epsg, scale)?;
    let (width, height) = grid_dims(max_x - min_x, max_y - min_y, pixel)?;
    let grid = AnalysisGrid {
        epsg,
        transform: GeoTransform {
            top_left_x: min_x,
            pixel_width: pixel,
            rotation_x: 0.0,
            top_left_y: max_y,
            rotation_y: 0.0,
            pixel_height: -pixel,
        },
        width,
        height,
        cell_size_m: scale,
    };
    log::debug!("Analysis grid: EPSG:{} {}x{} at {} m", epsg, width, height, scale);
    Ok(grid)
}

/// Path GDAL can open for an asset href
pub fn gdal_path(href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        format!("/vsicurl/{}", href)
    } else if let Some(rest) = href.strip_prefix("s3://") {
        format!("/vsis3/{}", rest)
    } else if let Some(rest) = href.strip_prefix("gs://") {
        format!("/vsigs/{}", rest)
    } else {
        href.to_string()
    }
}

/// Reads assets and resamples them (nearest neighbour) onto an analysis grid
pub struct RasterReader;

impl RasterReader {
    /// One band of one asset on `grid`; nodata and off-image pixels are NaN
    pub fn read_band_on_grid(source: &AssetSource, grid: &AnalysisGrid) -> CompareResult<Array2<Pixel>> {
        let path = gdal_path(&source.href);
        log::debug!("Reading band {} of {}", source.band_index, path);

        let dataset = Dataset::open(Path::new(&path))?;
        let (src_width, src_height) = dataset.raster_size();
        let src_gt = GeoTransform::from_gdal(dataset.geo_transform()?);
        if src_gt.rotation_x != 0.0 || src_gt.rotation_y != 0.0 {
            return Err(CompareError::InvalidFormat(format!(
                "{} has a rotated geotransform, which is not supported",
                source.href
            )));
        }
        if source.band_index == 0 || source.band_index > dataset.raster_count() as usize {
            return Err(CompareError::InvalidFormat(format!(
                "{} has no band {}",
                source.href, source.band_index
            )));
        }

        // Grid pixel centres expressed in the source CRS
        let (rows, cols) = grid.shape();
        let mut xs = Vec::with_capacity(rows * cols);
        let mut ys = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                let (x, y) = grid.transform.pixel_center(row, col);
                xs.push(x);
                ys.push(y);
            }
        }

        let grid_srs = spatial_ref(grid.epsg)?;
        let same_crs = match dataset.spatial_ref() {
            Ok(src_srs) => {
                src_srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
                let same = src_srs.auth_code().map(|c| c as u32 == grid.epsg).unwrap_or(false);
                if !same {
                    let transform = CoordTransform::new(&grid_srs, &src_srs)?;
                    let mut zs = vec![0.0; xs.len()];
                    transform.transform_coords(&mut xs, &mut ys, &mut zs)?;
                }
                same
            }
            Err(_) => {
                log::warn!("{} has no spatial reference, assuming EPSG:{}", source.href, grid.epsg);
                true
            }
        };
        log::debug!("Source CRS matches grid: {}", same_crs);

        // Source pixel of every grid pixel, None when outside the source
        let indices: Vec<Option<(usize, usize)>> = xs
            .iter()
            .zip(ys.iter())
            .map(|(&x, &y)| {
                let (c, r) = src_gt.world_to_pixel(x, y);
                if c.is_finite() && r.is_finite() && c >= 0.0 && r >= 0.0 {
                    let (c, r) = (c.floor() as usize, r.floor() as usize);
                    if c < src_width && r < src_height {
                        return Some((r, c));
                    }
                }
                None
            })
            .collect();

        let mut out = Array2::<Pixel>::from_elem((rows, cols), Pixel::NAN);
        let window = indices.iter().flatten().fold(None, |acc: Option<(usize, usize, usize, usize)>, &(r, c)| {
            Some(match acc {
                None => (r, r, c, c),
                Some((r0, r1, c0, c1)) => (r0.min(r), r1.max(r), c0.min(c), c1.max(c)),
            })
        });
        let (r0, r1, c0, c1) = match window {
            Some(w) => w,
            None => {
                log::warn!("{} does not overlap the analysis grid", source.href);
                return Ok(out);
            }
        };
        let (win_w, win_h) = (c1 - c0 + 1, r1 - r0 + 1);

        let band = dataset.rasterband(source.band_index as isize)?;
        let nodata = band.no_data_value();
        let buffer = band.read_as::<f64>(
            (c0 as isize, r0 as isize),
            (win_w, win_h),
            (win_w, win_h),
            None,
        )?;

        for (i, idx) in indices.iter().enumerate() {
            if let Some((r, c)) = idx {
                let value = buffer.data[(r - r0) * win_w + (c - c0)];
                let is_nodata = nodata.map(|nd| value == nd).unwrap_or(false);
                if !is_nodata {
                    out[[i / cols, i % cols]] = value as Pixel;
                }
            }
        }
        Ok(out)
    }

    /// The named bands of a record, stacked in order
    pub fn load_record(record: &ImageRecord, bands: &[String], grid: &AnalysisGrid) -> CompareResult<Image> {
        log::info!("Loading {} band(s) of {}", bands.len(), record.id);
        let sources = bands
            .iter()
            .map(|name| {
                record.source(name).ok_or_else(|| {
                    CompareError::InvalidFormat(format!("image {} has no band '{}'", record.id, name))
                })
            })
            .collect::<CompareResult<Vec<_>>>()?;

        // Each read opens its own dataset, so bands can be fetched concurrently
        #[cfg(feature = "parallel")]
        let planes = sources
            .par_iter()
            .map(|source| Self::read_band_on_grid(source, grid))
            .collect::<CompareResult<Vec<_>>>()?;

        #[cfg(not(feature = "parallel"))]
        let planes = sources
            .iter()
            .map(|source| Self::read_band_on_grid(source, grid))
            .collect::<CompareResult<Vec<_>>>()?;

        let (rows, cols) = grid.shape();
        let mut data = Array3::<Pixel>::zeros((bands.len(), rows, cols));
        for (i, plane) in planes.iter().enumerate() {
            data.slice_mut(s![i, .., ..]).assign(plane);
        }
        Image::new(record.id.clone(), record.acquired, bands.to_vec(), data, grid.clone())
    }

    /// Primary bands followed by the linked reference bands
    pub fn load_linked(linked: &LinkedRecord, grid: &AnalysisGrid) -> CompareResult<Image> {
        let primary = Self::load_record(&linked.primary, &linked.primary.band_order, grid)?;
        let secondary = Self::load_record(&linked.secondary, &linked.linked_bands, grid)?;
        primary.concat(&secondary)
    }
}

/// GeoTIFF output through the GTiff driver
pub struct GeoTiffWriter;

impl GeoTiffWriter {
    /// Write a band stack, casting each pixel to `T`. NaN (or values `T`
    /// cannot hold) become `nodata`.
    pub fn write<T, P>(stack: &BandStack, grid: &AnalysisGrid, nodata: T, output_path: P) -> CompareResult<()>
    where
        T: GdalType + NumCast + ToPrimitive + Copy,
        P: AsRef<Path>,
    {
        log::info!("Writing GeoTIFF: {}", output_path.as_ref().display());
        let (bands, rows, cols) = stack.dim();
        if (rows, cols) != grid.shape() {
            return Err(CompareError::Processing(format!(
                "stack {}x{} does not match grid {}x{}",
                rows, cols, grid.height, grid.width
            )));
        }
        if let Some(parent) = output_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let mut dataset = driver.create_with_band_type::<T, _>(
            output_path.as_ref(),
            cols as isize,
            rows as isize,
            bands as isize,
        )?;
        dataset.set_geo_transform(&grid.transform.to_gdal())?;
        dataset.set_spatial_ref(&SpatialRef::from_epsg(grid.epsg)?)?;

        let nodata_f64 = nodata.to_f64().ok_or_else(|| {
            CompareError::Processing("nodata value is not representable as f64".to_string())
        })?;
        for b in 0..bands {
            let flat: Vec<T> = stack
                .slice(s![b, .., ..])
                .iter()
                .map(|&v| {
                    if v.is_nan() {
                        nodata
                    } else {
                        <T as NumCast>::from(v).unwrap_or(nodata)
                    }
                })
                .collect();
            let mut rasterband = dataset.rasterband((b + 1) as isize)?;
            let buffer = Buffer::new((cols, rows), flat);
            rasterband.write((0, 0), (cols, rows), &buffer)?;
            rasterband.set_no_data_value(Some(nodata_f64))?;
        }

        log::info!("GeoTIFF saved: {} band(s), {}x{}", bands, cols, rows);
        Ok(())
    }
}
