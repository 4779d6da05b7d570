//! Prints the device nodes the driver would use on this machine.

use inkwave_driver::discovery;

fn main() {
    match discovery::discover_framebuffer() {
        Some(path) => println!("framebuffer: {}", path.display()),
        None => println!("framebuffer: not found"),
    }

    match discovery::discover_temperature_sensor() {
        Some(path) => println!("temperature sensor: {}", path.display()),
        None => println!("temperature sensor: not found"),
    }
}
