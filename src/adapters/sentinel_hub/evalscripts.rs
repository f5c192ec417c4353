/// Orbit discovery: no pixel output, one `userData` entry per orbit with its
/// granules, cloud cover and footprints.
pub const DISCOVER_ORBITS: &str = r#"//VERSION=3
function setup() {
  return {
    input: [{ bands: [], metadata: ["bounds"] }],
    mosaicking: Mosaicking.ORBIT,
    output: { bands: 0 }
  };
}

function evaluatePixel(samples) {
  return [];
}

function updateOutputMetadata(scenes, inputMetadata, outputMetadata) {
  outputMetadata.userData = {
    orbits: scenes.orbits.map(function (orbit) {
      return {
        dateFrom: orbit.dateFrom,
        dateTo: orbit.dateTo,
        tiles: orbit.tiles.map(function (tile) {
          return {
            tileId: tile.shId,
            productId: tile.productId,
            date: tile.date,
            cloudCoverage: tile.cloudCoverage,
            dataGeometry: tile.dataGeometry,
            dataEnvelope: tile.dataEnvelope
          };
        })
      };
    })
  };
}
"#;

/// Raw L2A reflectances plus scene classification, in the band order the
/// postprocessor expects.
pub const RAW_BANDS: &str = r#"//VERSION=3
function setup() {
  return {
    input: [{ bands: ["B02", "B03", "B04", "B08", "B11", "B12", "SCL"] }],
    output: { bands: 7, sampleType: "FLOAT32" }
  };
}

function evaluatePixel(sample) {
  return [sample.B02, sample.B03, sample.B04, sample.B08, sample.B11, sample.B12, sample.SCL];
}
"#;
