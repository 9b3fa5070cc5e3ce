#![allow(dead_code)]

use rietforge::parser::split_lines;

/// A refined two-phase file in the shape the engine writes.
pub const SAMPLE_OUT: &str = concat!(
    "r_exp 3.21 r_exp_dash 5.1 r_wp 6.54 r_wp_dash 9.2 r_p 4.9 gof 2.04\n",
    "xdd \"data/scan_25C_01.xy\"\n",
    "\tbkg @ 120.5`_1.2 -35.2`_0.9 12.1\n",
    "\t\t4.5 -1.2\n",
    "\tZero_Error(@, 0.0123`_0.0004)\n",
    "\tSpecimen_Displacement(@, -0.0451`_0.0021)\n",
    "\t/* disabled block\n",
    "\tscale @ 99\n",
    "\t*/\n",
    "\tprm !fixed_ratio 0.5\n",
    "\tstr\n",
    "\t\tphase_name \"Anatase\"\n",
    "\t\tspace_group \"I41/amd\"\n",
    "\t\tscale @ 0.0015`_0.0002 ' main phase\n",
    "\t\tTetragonal(@ 3.7852`_0.0001, @ 9.5143`_0.0004)\n",
    "\t\tCS_L(@, 210.5`_12.1)\n",
    "\t\tMVW( 1239.98, 136.28, 62.5`_0.4)\n",
    "\t\tr_bragg 1.234\n",
    "\t\tsite Ti1 x 0 y 0.75 z 0.125 occ Ti+4 1 beq @ 0.41`_0.03\n",
    "\t\tsite O1 x 0 y 0.25 z @ 0.0827`_0.0003 occ O-2 1 beq 0.8\n",
    "\t\tsite M1 x 0.5 y 0.5 z 0.5 occ Fe+3 0.6 occ Mg 0.4 beq 1\n",
    "\t\tCreate_hklm_d_Th2_Ip_file(anatase.hkl)\n",
    "\tstr\n",
    "\t\tphase_name \"Rutile\"\n",
    "\t\tscale sf_rutile 0.00012`_0.00001\n",
    "\t\ta lp_a 4.5937 b 4.5937 c @ 2.9587\n",
    "\t\tprm sf_total = sf_rutile * 2; : 0.00024\n",
    "\tOut_X_Yobs_Ycalc_Ydiff(\"result_25C_rietveld.xy\")\n",
);

pub const LINE_FIT: usize = 0;
pub const LINE_XDD: usize = 1;
pub const LINE_BKG: usize = 2;
pub const LINE_BKG_MORE: usize = 3;
pub const LINE_ZERO: usize = 4;
pub const LINE_DISPLACEMENT: usize = 5;
pub const LINE_GLOBAL_PRM: usize = 9;
pub const LINE_STR_A: usize = 10;
pub const LINE_SCALE_A: usize = 13;
pub const LINE_LATTICE_A: usize = 14;
pub const LINE_SITE_TI: usize = 18;
pub const LINE_SITE_M: usize = 20;
pub const LINE_HKL_A: usize = 21;
pub const LINE_STR_B: usize = 22;
pub const LINE_SCALE_B: usize = 24;
pub const LINE_LATTICE_B: usize = 25;
pub const LINE_OUTPUT: usize = 27;

pub fn sample_lines() -> Vec<String> {
    split_lines(SAMPLE_OUT)
}

/// Appends a correlation block to `lines`.
pub fn with_correlations(mut lines: Vec<String>, block: &str) -> Vec<String> {
    lines.push("C_matrix_normalized\n".to_string());
    lines.extend(split_lines(block));
    lines
}
