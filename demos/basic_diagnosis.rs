//! Diagnose a short synthetic track with a few planted faults.
//!
//! Run with: cargo run --example basic_diagnosis

use trajectory_doctor::{diagnose, DiagnoseOptions, PointStatus};

fn main() {
    // Walking north through Shenzhen, one fix every 3 seconds
    let mut raw: Vec<Vec<f64>> = (0..80)
        .map(|i| vec![22.5431 + i as f64 * 0.0001, 113.9510, 1_705_318_200.0 + i as f64 * 3.0, 12.0])
        .collect();

    raw[15][0] = 40.0; // Teleport to the other side of the planet
    raw[15][1] = -70.0;
    for row in &mut raw[30..38] {
        row[1] += 0.000194; // ~20 m drift east
    }
    for row in raw.iter_mut().skip(55) {
        row[2] += 120.0; // Two minutes without fixes
    }

    let mut options = DiagnoseOptions::default();
    options.algorithms.simplification = false;

    let data = diagnose(&raw, &options).unwrap();
    let d = &data.diagnostics;

    println!("Trajectory Diagnosis (report {})\n", data.report_id);
    println!(
        "Original:  {} points, {:.0}m in {:.0}s, max {:.1} km/h",
        data.original.point_count, data.original.distance, data.original.duration_seconds, data.original.max_speed
    );
    println!(
        "Corrected: {} points, {:.0}m in {:.0}s, max {:.1} km/h\n",
        data.corrected.point_count, data.corrected.distance, data.corrected.duration_seconds, data.corrected.max_speed
    );

    println!("Anomalies:");
    for anomaly in &d.anomalies {
        println!("  {:<22} {:>3} points  {:?}", anomaly.kind.as_str(), anomaly.count, anomaly.severity);
        for gap in &anomaly.gaps {
            println!(
                "    gap {}..{} ({:.0}s) filled={} inserted={}",
                gap.start_index, gap.end_index, gap.duration_seconds, gap.filled, gap.inserted_points
            );
        }
    }

    println!("\nStages:");
    for algo in &d.algorithms {
        println!(
            "  {:<22} processed={} fixed={} removed={} added={}",
            algo.name, algo.processed_points, algo.fixed_points, algo.removed_points, algo.added_points
        );
    }

    let health = &d.health_score;
    println!("\nHealth: {} ({:?})", health.total, health.rating);
    for (name, detail) in &health.breakdown {
        println!("  {:<12} {:>5.1}  {}", name, detail.score, detail.description);
    }

    if let Some(points) = &data.points {
        let jump = points.iter().find(|p| p.status == PointStatus::Jump);
        if let Some(p) = jump {
            println!(
                "\nPoint {} moved from ({:.4}, {:.4}) to ({:.4}, {:.4})",
                p.index(),
                p.original_lat(),
                p.original_lon(),
                p.corrected_lat,
                p.corrected_lon
            );
        }
    }

    println!("\n{}", serde_json::to_string_pretty(&d.health_score).unwrap());
}
