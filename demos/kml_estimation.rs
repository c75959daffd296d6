use locus::{extract_kml_points, ClusterEstimator, EstimatorConfig};
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use std::fmt::Write as _;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Minimal end-to-end: KML placemarks -> points -> cluster estimates.
    //
    // Real input would come off disk; here the document is synthesized so the
    // example stays self-contained. Two detection groups, thirty placemarks
    // each, scattered around known centers.
    let mut rng = StdRng::seed_from_u64(7);
    let noise = Normal::new(0.0, 0.002)?;
    let mut doc = String::from("<kml><Document>\n");
    for (lat, lon) in [(49.26, -123.25), (49.31, -123.10)] {
        for _ in 0..30 {
            // KML field order is lon,lat,alt.
            writeln!(
                doc,
                "<Placemark><Point><coordinates>{:.6},{:.6},{:.1}</coordinates></Point></Placemark>",
                lon + noise.sample(&mut rng),
                lat + noise.sample(&mut rng),
                100.0,
            )?;
        }
    }
    doc.push_str("</Document></kml>\n");

    let detections = extract_kml_points(&doc);
    println!("Extracted {} points.", detections.len());

    let config = EstimatorConfig::new(
        5,  // requires at least 5 points to start
        1,  // any new point justifies a refit
        10, // component bound
        42, // seed
        2,  // ownership floor
    );
    let mut estimator = ClusterEstimator::create(config)?;

    match estimator.run(&detections, false)? {
        Some(clusters) => {
            println!("Identified {} clusters:", clusters.len());
            for (i, c) in clusters.iter().enumerate() {
                println!(
                    "Cluster {}: center=({:.5}, {:.5}, {:.1}), weight={:.2}, variance={:.6}",
                    i + 1,
                    c.mean.latitude,
                    c.mean.longitude,
                    c.mean.altitude,
                    c.weight,
                    c.covariance,
                );
            }
        }
        None => println!("Clustering did not run (insufficient points or not converged)."),
    }

    Ok(())
}
