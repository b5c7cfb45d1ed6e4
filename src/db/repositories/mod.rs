mod inspections;
mod meters;
